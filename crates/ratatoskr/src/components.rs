//! Component kinds most teams need, ready to register.
use std::io::{Read, Write};

use crate::serialization::{Decode, Encode, VarInt};
use crate::{Component, RegistryBuilder, Result};

/// Registers every kind in this module.
pub fn register_standard(builder: &mut RegistryBuilder) -> Result<()> {
    builder.register::<RobotPose>()?;
    builder.register::<BallEstimate>()?;
    Ok(())
}

/// Where a robot believes it is on the field, in meters and radians.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct RobotPose {
    pub x: f32,
    pub y: f32,
    pub rotation: f32,
}

impl Encode for RobotPose {
    fn encode(&self, mut write: impl Write) -> Result<()> {
        self.x.encode(&mut write)?;
        self.y.encode(&mut write)?;
        self.rotation.encode(&mut write)
    }

    fn encode_len(&self) -> usize {
        12
    }
}

impl Decode for RobotPose {
    fn decode(mut read: impl Read) -> Result<Self> {
        Ok(Self {
            x: f32::decode(&mut read)?,
            y: f32::decode(&mut read)?,
            rotation: f32::decode(&mut read)?,
        })
    }
}

impl Component for RobotPose {
    const NAME: &'static str = "RobotPose";
    const PRIORITY: i32 = 10;
}

/// A robot's own estimate of the ball.
///
/// `age_ms` is the time since the ball was last seen, encoded as a [`VarInt`] since it is
/// usually small.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct BallEstimate {
    /// Field position in meters.
    pub position: [f32; 2],
    /// Velocity in meters per second.
    pub velocity: [f32; 2],
    pub age_ms: u32,
}

impl Encode for BallEstimate {
    fn encode(&self, mut write: impl Write) -> Result<()> {
        self.position.encode(&mut write)?;
        self.velocity.encode(&mut write)?;
        VarInt::from(self.age_ms).encode(&mut write)
    }

    fn encode_len(&self) -> usize {
        self.position.encode_len()
            + self.velocity.encode_len()
            + VarInt::from(self.age_ms).encode_len()
    }
}

impl Decode for BallEstimate {
    fn decode(mut read: impl Read) -> Result<Self> {
        Ok(Self {
            position: Decode::decode(&mut read)?,
            velocity: Decode::decode(&mut read)?,
            age_ms: VarInt::<u32>::decode(&mut read)?.into(),
        })
    }
}

impl Component for BallEstimate {
    const NAME: &'static str = "BallEstimate";
    const PRIORITY: i32 = 5;
}
