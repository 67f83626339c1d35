use std::cell::Cell;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::rc::Rc;
use std::thread;
use std::time::Duration;

use ratatoskr::components::{RobotPose, register_standard};
use ratatoskr::config::CommsConfig;
use ratatoskr::transport::Mode;
use ratatoskr::{Envelope, Header, Packer, Receipt, Registry, RegistryBuilder, Result, Transport};

fn standard_registry() -> Result<Registry> {
    let mut builder = RegistryBuilder::new();
    register_standard(&mut builder)?;
    builder.freeze()
}

fn loopback_socket() -> Result<UdpSocket> {
    Ok(UdpSocket::bind((Ipv4Addr::LOCALHOST, 0))?)
}

/// Receives until `expected` datagrams have been handled or a second has passed.
fn receive_until(
    transport: &mut Transport,
    registry: &Registry,
    expected: usize,
) -> Result<Receipt> {
    let mut total = Receipt::default();
    for _ in 0..100 {
        let receipt = transport.receive_all(registry)?;
        total.delivered += receipt.delivered;
        total.self_echo += receipt.self_echo;
        total.rejected += receipt.rejected;

        if total.total() >= expected {
            break;
        }
        thread::sleep(Duration::from_millis(10));
    }
    Ok(total)
}

#[test]
fn test_two_robots() -> Result<()> {
    let registry = standard_registry()?;
    let _pose = registry.on_compile(|pose: &mut RobotPose| pose.x = 4.5)?;

    let socket_a = loopback_socket()?;
    let socket_b = loopback_socket()?;
    let addr_a = socket_a.local_addr()?;
    let addr_b = socket_b.local_addr()?;

    let robot_a = Transport::with_socket(socket_a, addr_b, 1)?;
    let mut robot_b = Transport::with_socket(socket_b, addr_a, 2)?;
    assert_eq!(robot_b.mode(), Mode::Custom);

    let seen = Rc::new(Cell::new(0.0));
    let last_x = Rc::clone(&seen);
    let _callback = registry.on_receive(move |pose: &RobotPose, header: &Header| {
        assert_eq!(header.sender, 1);
        last_x.set(pose.x);
    })?;

    let packet = Packer::new().pack(&Envelope::compile(&registry, Header::new(1, 250)))?;
    assert!(robot_a.send(&packet)?);

    let receipt = receive_until(&mut robot_b, &registry, 1)?;
    assert_eq!(receipt.delivered, 1);
    assert_eq!(seen.get(), 4.5);

    let peer = robot_b.peers().get(&1).copied();
    assert_eq!(peer.map(|peer| (peer.address, peer.timestamp)), Some((addr_a, 250)));

    Ok(())
}

#[test]
fn test_own_packets_are_echoes() -> Result<()> {
    let registry = standard_registry()?;
    let calls = Rc::new(Cell::new(0));
    let counter = Rc::clone(&calls);
    let _callback =
        registry.on_receive(move |_: &RobotPose, _: &Header| counter.set(counter.get() + 1))?;

    let socket = loopback_socket()?;
    let own = socket.local_addr()?;
    let mut robot = Transport::with_socket(socket, own, 5)?;

    let packet = Packer::new().pack(&Envelope::compile(&registry, Header::new(5, 0)))?;
    assert!(robot.send(&packet)?);

    let receipt = receive_until(&mut robot, &registry, 1)?;
    assert_eq!(receipt.self_echo, 1);
    assert_eq!(receipt.delivered, 0);
    assert_eq!(calls.get(), 0);
    assert!(robot.peers().is_empty());

    Ok(())
}

#[test]
fn test_garbage_is_rejected() -> Result<()> {
    let registry = standard_registry()?;

    let socket = loopback_socket()?;
    let target = socket.local_addr()?;
    let mut robot = Transport::with_socket(socket, target, 5)?;

    let sender = loopback_socket()?;
    sender.send_to(b"not a team message", target)?;

    let receipt = receive_until(&mut robot, &registry, 1)?;
    assert_eq!(receipt.rejected, 1);
    assert_eq!(receipt.delivered, 0);

    Ok(())
}

#[test]
fn test_oversized_datagram_is_rejected() -> Result<()> {
    let registry = standard_registry()?;

    let socket = loopback_socket()?;
    let target = socket.local_addr()?;
    let mut robot = Transport::with_socket(socket, target, 5)?;

    // A valid packet followed by padding past the message size.
    let packet = Packer::new().pack(&Envelope::compile(&registry, Header::new(6, 0)))?;
    let mut datagram = packet.into_bytes();
    datagram.resize(200, 0);

    let sender = loopback_socket()?;
    sender.send_to(&datagram, target)?;

    let receipt = receive_until(&mut robot, &registry, 1)?;
    assert_eq!(receipt.rejected, 1);
    assert_eq!(receipt.delivered, 0);
    assert!(robot.peers().is_empty());

    Ok(())
}

#[test]
fn test_local_mode() -> Result<()> {
    const PORT: u16 = 23456;
    let registry = standard_registry()?;

    let mut robot_one = Transport::start_local(PORT, 1)?;
    let mut robot_two = Transport::start_local(PORT, 2)?;
    assert_eq!(robot_one.mode(), Mode::Local);
    assert_eq!(
        robot_one.target(),
        SocketAddr::from((Ipv4Addr::new(239, 0, 0, 1), PORT))
    );

    let packet = Packer::new().pack(&Envelope::compile(&registry, Header::new(1, 30)))?;
    assert!(robot_one.send(&packet)?);

    let received = receive_until(&mut robot_two, &registry, 1)?;
    assert_eq!(received.delivered, 1);
    assert_eq!(robot_two.peers().get(&1).map(|peer| peer.timestamp), Some(30));

    let echoed = receive_until(&mut robot_one, &registry, 1)?;
    assert_eq!(echoed.self_echo, 1);
    assert_eq!(echoed.delivered, 0);

    Ok(())
}

#[test]
fn test_local_mode_from_config() -> Result<()> {
    let config: CommsConfig = toml::from_str(
        r#"
robot_id = 9
port = 23457
transport = { mode = "local", host = "127.0.3.4" }
"#,
    )?;

    let transport = Transport::from_config(&config)?;
    assert_eq!(transport.mode(), Mode::Local);
    assert_eq!(transport.robot_id(), 9);
    assert_eq!(
        transport.target(),
        SocketAddr::from((Ipv4Addr::new(239, 0, 3, 4), 23457))
    );

    Ok(())
}

#[test]
fn test_field_mode_binds() -> Result<()> {
    const PORT: u16 = 23458;
    let subnet = Ipv4Addr::new(127, 255, 255, 255);

    let transport = Transport::start_field(PORT, subnet, 4)?;
    assert_eq!(transport.mode(), Mode::Field);
    assert_eq!(transport.robot_id(), 4);
    assert_eq!(transport.target(), SocketAddr::from((subnet, PORT)));
    assert_eq!(transport.local_addr()?.port(), PORT);

    // Robots on one host share the port.
    let teammate = Transport::start_field(PORT, subnet, 5)?;
    assert_eq!(teammate.local_addr()?.port(), PORT);

    Ok(())
}
