#![no_std]
#![warn(missing_docs)]

//! `canhack` is a bit-accurate CAN 2.0 / CAN-FD frame encoder and a
//! real-time bit-bang attack engine for exploring protocol-level weaknesses
//! in the CAN bus: arbitration loss, dual-interpretation ("Janus") framing,
//! targeted identifier spoofing, and error-frame injection.
//!
//! The crate is split the same way a CAN peripheral driver splits its
//! hardware-independent protocol logic from the board it runs on: this
//! crate (`canhack`) owns the encoder and the engine; [`canhack_core`] owns
//! the two-pin, one-counter [`CanHackPort`](canhack_core::CanHackPort)
//! abstraction that a board support crate implements.
//!
//! ```no_run
//! use canhack::prelude::*;
//! use embedded_can::{Id, StandardId};
//!
//! # struct MyPort;
//! # unsafe impl canhack_core::CanHackPort for MyPort {
//! #     fn now(&mut self) -> u32 { 0 }
//! #     fn reset_clock(&mut self, _offset: u32) {}
//! #     fn set_tx(&mut self, _level: bool) {}
//! #     fn get_rx(&mut self) -> bool { true }
//! #     const BIT_TIME: u32 = 1;
//! #     const BIT_TIME_FD: u32 = 1;
//! #     const SAMPLE_POINT_OFFSET: u32 = 1;
//! #     const SAMPLE_POINT_OFFSET_FD: u32 = 1;
//! #     const SAMPLE_TO_BIT_END: u32 = 1;
//! #     const SAMPLE_TO_BIT_END_FD: u32 = 1;
//! #     const FALLING_EDGE_RECALIBRATE: bool = true;
//! # }
//! # fn get_port() -> MyPort { MyPort }
//! let port = get_port();
//! let mut attack = AttackController::new(port);
//! attack.set_timeout(1_000_000);
//!
//! let id = Id::Standard(StandardId::new(0x123).unwrap());
//! let spec = FrameSpec::new(id, false, 1, &[0xA5], false, false, false);
//! attack.set_frame(0, &spec).unwrap();
//! attack.send_frame(3, false).unwrap();
//! ```

pub mod attack;
pub mod config;
pub mod engine;
pub mod error;
pub mod frame;
pub mod prelude;

pub use canhack_core;
pub use embedded_can;
