use std::cell::Cell;
use std::path::PathBuf;
use std::rc::Rc;
use std::thread;
use std::time::Duration;

use clap::Parser;
use miette::{IntoDiagnostic, Result, WrapErr};
use ratatoskr::components::{BallEstimate, RobotPose, register_standard};
use ratatoskr::config::{CommsConfig, Config};
use ratatoskr::message::Clock;
use ratatoskr::{Envelope, Header, Packer, Receipt, Registry, RegistryBuilder, Transport};
use tracing::{debug, info, warn};

/// Sends this robot's state to the team and logs what the teammates send back.
#[derive(Parser, Debug)]
#[clap(name = "ratatoskr_node", version)]
struct Cli {
    /// Directory containing `comms.toml`.
    #[clap(long, short, default_value = "tools/ratatoskr_node/config")]
    config: PathBuf,

    /// Overrides the robot id from the config.
    #[clap(long, short)]
    robot_id: Option<u16>,

    /// Milliseconds between two control cycles.
    #[clap(long, short, default_value_t = 100)]
    interval_ms: u64,

    /// Stops after this many cycles instead of running forever.
    #[clap(long)]
    cycles: Option<u64>,
}

/// Pretend world model, moving the robot along a circle.
#[derive(Default)]
struct WorldModel {
    pose: Cell<RobotPose>,
    ball: Cell<BallEstimate>,
}

impl WorldModel {
    fn update(&self, time_ms: u32, robot_id: u16) {
        let t = time_ms as f32 / 1000.0;
        let phase = f32::from(robot_id);

        self.pose.set(RobotPose {
            x: (t + phase).cos(),
            y: (t + phase).sin(),
            rotation: t + phase,
        });
        self.ball.set(BallEstimate {
            position: [0.5 * t.sin(), 0.0],
            velocity: [0.5 * t.cos(), 0.0],
            age_ms: time_ms % 1000,
        });
    }
}

/// What one cycle got done.
#[derive(Debug, Default)]
struct CycleReport {
    sent: bool,
    receipt: Receipt,
}

/// Compiles, packs, sends and drains once.
///
/// Socket errors are logged and the cycle carries on, a lost packet is replaced by the next one.
fn run_cycle(
    transport: &mut Transport,
    registry: &Registry,
    packer: &Packer,
    header: Header,
) -> CycleReport {
    let mut report = CycleReport::default();

    let envelope = Envelope::compile(registry, header);
    match packer.pack(&envelope) {
        Ok(packet) => match transport.send(&packet) {
            Ok(true) => {
                debug!(usage = packet.usage(), "sent packet");
                report.sent = true;
            }
            Ok(false) => warn!("socket busy, dropped packet"),
            Err(err) => warn!(?err, "unable to send packet"),
        },
        Err(err) => warn!(?err, "unable to pack message"),
    }

    match transport.receive_all(registry) {
        Ok(receipt) => report.receipt = receipt,
        Err(err) => warn!(?err, "unable to receive packets"),
    }

    report
}

fn main() -> Result<()> {
    miette::set_panic_hook();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Cli::parse();

    let mut config = CommsConfig::load(&args.config)
        .into_diagnostic()
        .wrap_err_with(|| format!("failed to load config from {}", args.config.display()))?;
    if let Some(robot_id) = args.robot_id {
        config.robot_id = robot_id;
    }

    let mut builder = RegistryBuilder::new();
    register_standard(&mut builder).into_diagnostic()?;
    config.apply_priorities(&mut builder).into_diagnostic()?;
    let registry = builder.freeze().into_diagnostic()?;

    let world = Rc::new(WorldModel::default());
    let pose_state = Rc::clone(&world);
    let ball_state = Rc::clone(&world);
    let _subscriptions = [
        registry
            .on_compile(move |pose: &mut RobotPose| *pose = pose_state.pose.get())
            .into_diagnostic()?,
        registry
            .on_compile(move |ball: &mut BallEstimate| *ball = ball_state.ball.get())
            .into_diagnostic()?,
        registry
            .on_receive(|pose: &RobotPose, header: &Header| {
                info!(
                    robot = header.sender,
                    x = pose.x,
                    y = pose.y,
                    rotation = pose.rotation,
                    "teammate pose"
                );
            })
            .into_diagnostic()?,
        registry
            .on_receive(|ball: &BallEstimate, header: &Header| {
                debug!(
                    robot = header.sender,
                    position = ?ball.position,
                    age_ms = ball.age_ms,
                    "teammate ball"
                );
            })
            .into_diagnostic()?,
    ];

    let mut transport = Transport::from_config(&config)
        .into_diagnostic()
        .wrap_err("failed to start transport")?;
    let packer = Packer::with_budget(config.budget);
    let clock = Clock::start();

    info!(
        robot_id = config.robot_id,
        mode = %transport.mode(),
        target = %transport.target(),
        "running"
    );

    let mut cycle = 0;
    while args.cycles.is_none_or(|cycles| cycle < cycles) {
        let now = clock.now();
        world.update(now, config.robot_id);

        let header = Header::new(config.robot_id, now);
        let report = run_cycle(&mut transport, &registry, &packer, header);
        debug!(
            cycle,
            sent = report.sent,
            delivered = report.receipt.delivered,
            self_echo = report.receipt.self_echo,
            rejected = report.receipt.rejected,
            "cycle done"
        );

        cycle += 1;
        thread::sleep(Duration::from_millis(args.interval_ms));
    }

    info!(cycles = cycle, teammates = transport.peers().len(), "stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::net::{Ipv4Addr, SocketAddr, UdpSocket};

    use super::*;

    fn standard_registry() -> ratatoskr::Result<Registry> {
        let mut builder = RegistryBuilder::new();
        register_standard(&mut builder)?;
        builder.freeze()
    }

    #[test]
    fn test_cycle_survives_send_error() -> ratatoskr::Result<()> {
        let registry = standard_registry()?;

        // Broadcasting without SO_BROADCAST is refused by the kernel.
        let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0))?;
        let target = SocketAddr::from((Ipv4Addr::BROADCAST, 10012));
        let mut transport = Transport::with_socket(socket, target, 1)?;

        let header = Header::new(1, 0);
        let first = run_cycle(&mut transport, &registry, &Packer::new(), header);
        let second = run_cycle(&mut transport, &registry, &Packer::new(), header);

        #[cfg(target_os = "linux")]
        assert!(!first.sent && !second.sent);
        assert_eq!(second.receipt.delivered, 0);
        Ok(())
    }

    #[test]
    fn test_cycle_reports_echo() -> ratatoskr::Result<()> {
        let registry = standard_registry()?;

        let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0))?;
        let own = socket.local_addr()?;
        let mut transport = Transport::with_socket(socket, own, 4)?;

        let mut self_echo = 0;
        for cycle in 0..50 {
            let header = Header::new(4, cycle);
            let report = run_cycle(&mut transport, &registry, &Packer::new(), header);
            assert!(report.sent);
            assert_eq!(report.receipt.delivered, 0);
            self_echo += report.receipt.self_echo;
            if self_echo > 0 {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }

        assert!(self_echo > 0);
        Ok(())
    }
}
