#![no_std]
#![warn(missing_docs)]

//! `canhack-core` provides a set of essential abstractions that serve as a
//! thin integration layer between the platform independent [`canhack`] crate
//! and the board support package that actually owns the TX/RX pins and the
//! cycle counter.
//!
//! Traits from this crate are not supposed to be implemented by application
//! code directly; implementations should be provided by a board-specific
//! integration layer that knows how to toggle two GPIOs and read a
//! free-running timer.
//!
//! [`canhack`]: <https://docs.rs/crate/canhack/>

pub use fugit;

/// Logical level of the CAN bus.
///
/// A CAN bus is a wired-AND: any transmitter pulling the line low wins.
/// Dominant (`false`) is the wired-AND "0"; recessive (`true`) is the
/// floating "1". Using `bool` directly (instead of a dedicated enum) keeps
/// bit-stuffing and CRC math a matter of ordinary boolean/XOR arithmetic, the
/// same trick the wire encoding itself relies on.
pub const DOMINANT: bool = false;

/// See [`DOMINANT`].
pub const RECESSIVE: bool = true;

/// Platform port: the two GPIOs and the cycle counter that the bit engine
/// bit-bangs against.
///
/// Implementors own the TX pin, the RX pin and a free-running cycle counter.
/// All methods are expected to complete in a small, constant number of
/// cycles; none of them may block, sleep, or allocate.
///
/// # Safety
/// While a [`CanHackPort`] is being driven by a bit-engine primitive
/// (anything in `canhack::engine` or `canhack::attack`), the caller must
/// guarantee exclusive access to the pins and the counter, and must not allow
/// interrupts with latency comparable to [`CanHackPort::SAMPLE_TO_BIT_END`]
/// to preempt the primitive. Bit-engine primitives are hard real-time busy
/// loops; they assume they own the CPU for their entire duration.
pub unsafe trait CanHackPort {
    /// Reads the free-running cycle counter. Wraps modulo 2^32; callers must
    /// compare timestamps with wrap-safe arithmetic rather than plain `<`/`>`.
    fn now(&mut self) -> u32;

    /// Resets the counter so that the current instant reads as `offset`.
    fn reset_clock(&mut self, offset: u32);

    /// Drives the TX pin to `level` (`DOMINANT` or `RECESSIVE`).
    fn set_tx(&mut self, level: bool);

    /// Drives TX dominant. Default forwards to [`Self::set_tx`].
    fn set_tx_dominant(&mut self) {
        self.set_tx(DOMINANT);
    }

    /// Releases TX to recessive. Default forwards to [`Self::set_tx`].
    fn set_tx_recessive(&mut self) {
        self.set_tx(RECESSIVE);
    }

    /// Samples the RX pin.
    fn get_rx(&mut self) -> bool;

    /// Drives the optional CAN_DEBUG pin, used only by the bit engine's
    /// loopback/calibration primitive to mirror RX in real time. Default is
    /// a no-op: boards with no debug pin wired simply ignore it.
    fn set_debug(&mut self, _level: bool) {}

    /// Arbitration-phase bit time, in cycles.
    const BIT_TIME: u32;
    /// Data-phase bit time used while BRS is asserted, in cycles.
    const BIT_TIME_FD: u32;
    /// Cycles from the start of an arbitration-phase bit to its sample point.
    const SAMPLE_POINT_OFFSET: u32;
    /// Cycles from the start of a data-phase bit to its sample point.
    const SAMPLE_POINT_OFFSET_FD: u32;
    /// Cycles from the arbitration-phase sample point to the next bit
    /// boundary. Supplied independently of `BIT_TIME - SAMPLE_POINT_OFFSET`
    /// so implementors can fold in fixed transceiver/loopback latency.
    const SAMPLE_TO_BIT_END: u32;
    /// Cycles from the data-phase sample point to the next bit boundary.
    const SAMPLE_TO_BIT_END_FD: u32;
    /// Whether a recessive-to-dominant edge observed mid-frame (not just at
    /// idle) should resynchronise the sample clock, the way a compliant
    /// receiver resynchronises on every such edge.
    const FALLING_EDGE_RECALIBRATE: bool;
}
