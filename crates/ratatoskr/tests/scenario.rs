//! Robot 3 tells its teammates where it is and where it sees the ball.
use std::cell::RefCell;
use std::io::{Read, Write};
use std::rc::Rc;

use ratatoskr::serialization::{Decode, Encode};
use ratatoskr::transport::{Delivery, deliver};
use ratatoskr::{Component, Envelope, Header, Packer, Registry, RegistryBuilder, Result};

#[derive(Debug, Default, Clone, Copy, PartialEq)]
struct Pose {
    x: f32,
    y: f32,
}

#[derive(Debug, Default, Clone, Copy, PartialEq)]
struct Ball {
    x: f32,
    y: f32,
}

macro_rules! two_floats {
    ($t:ident, $name:literal, $priority:literal) => {
        impl Encode for $t {
            fn encode(&self, mut write: impl Write) -> Result<()> {
                self.x.encode(&mut write)?;
                self.y.encode(&mut write)
            }

            fn encode_len(&self) -> usize {
                8
            }
        }

        impl Decode for $t {
            fn decode(mut read: impl Read) -> Result<Self> {
                Ok(Self {
                    x: f32::decode(&mut read)?,
                    y: f32::decode(&mut read)?,
                })
            }
        }

        impl Component for $t {
            const NAME: &'static str = $name;
            const PRIORITY: i32 = $priority;
        }
    };
}

two_floats!(Pose, "Pose", 10);
two_floats!(Ball, "Ball", 5);

fn registry() -> Result<Registry> {
    let mut builder = RegistryBuilder::new();
    builder.register::<Pose>()?;
    builder.register::<Ball>()?;
    builder.freeze()
}

#[test]
fn test_pose_and_ball() -> Result<()> {
    let sender = registry()?;
    let _pose = sender.on_compile(|pose: &mut Pose| *pose = Pose { x: 1.0, y: 2.0 })?;
    let _ball = sender.on_compile(|ball: &mut Ball| *ball = Ball { x: 3.0, y: 4.0 })?;
    let packet = Packer::new().pack(&Envelope::compile(&sender, Header::new(3, 1000)))?;
    assert_eq!(packet.included().len(), 2);

    let decoded = Envelope::unpack(&registry()?, packet.as_bytes())?;
    assert_eq!(decoded.header.sender, 3);
    assert_eq!(decoded.header.timestamp, 1000);
    assert_eq!(decoded.get::<Pose>(), Some(&Pose { x: 1.0, y: 2.0 }));
    assert_eq!(decoded.get::<Ball>(), Some(&Ball { x: 3.0, y: 4.0 }));

    for (robot_id, expected) in [(3, 0), (7, 1)] {
        let receiver = registry()?;
        let poses = Rc::new(RefCell::new(Vec::new()));
        let balls = Rc::new(RefCell::new(Vec::new()));
        let pose_log = Rc::clone(&poses);
        let ball_log = Rc::clone(&balls);
        let _pose = receiver.on_receive(move |pose: &Pose, header: &Header| {
            pose_log.borrow_mut().push((*pose, header.sender));
        })?;
        let _ball = receiver.on_receive(move |ball: &Ball, header: &Header| {
            ball_log.borrow_mut().push((*ball, header.sender));
        })?;

        let delivery = deliver(&receiver, robot_id, packet.as_bytes());
        assert_eq!(delivery == Delivery::SelfEcho, robot_id == 3);
        assert_eq!(poses.borrow().len(), expected, "robot {robot_id}");
        assert_eq!(balls.borrow().len(), expected, "robot {robot_id}");
        if expected == 1 {
            assert_eq!(poses.borrow()[0], (Pose { x: 1.0, y: 2.0 }, 3));
            assert_eq!(balls.borrow()[0], (Ball { x: 3.0, y: 4.0 }, 3));
        }
    }

    Ok(())
}
