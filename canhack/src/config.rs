//! Bit-rate configuration: deriving [`canhack_core::CanHackPort`] timing
//! constants from a CPU clock and the desired arbitration/data bit rates.
//!
//! Mirrors the shape of a CAN peripheral's bit-timing calculator (prescaler
//! + segment lengths derived from a target bit rate), generalised from
//! "register prescaler" to "cycle-counter timing constants" since a
//! bit-banged port has no peripheral prescaler register to program.

use fugit::HertzU32;

/// Requested arbitration and (optional) data bit rates, plus the fraction of
/// a bit period after which the bus should be sampled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitRateConfig {
    /// Arbitration-phase bit rate.
    pub arbitration_bitrate: HertzU32,
    /// Data-phase bit rate, used only while BRS is asserted. `None` for a
    /// configuration that never transmits FD frames with BRS.
    pub data_bitrate: Option<HertzU32>,
    /// Sample point as a percent of the bit period, e.g. `80` for 80%.
    pub sample_point_percent: u8,
}

/// Errors in a requested [`BitRateConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitRateError {
    /// `sample_point_percent` was outside `1..100`.
    InvalidSamplePoint,
    /// The requested bit rate does not divide the CPU clock finely enough to
    /// produce at least a handful of cycles per bit.
    RateTooFast,
    /// The data bit rate was slower than the arbitration bit rate.
    DataSlowerThanArbitration,
}

/// Timing constants derived from a [`BitRateConfig`] and a CPU clock.
///
/// Feed these directly into a [`canhack_core::CanHackPort`] implementation's
/// associated constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    /// See [`canhack_core::CanHackPort::BIT_TIME`].
    pub bit_time: u32,
    /// See [`canhack_core::CanHackPort::BIT_TIME_FD`].
    pub bit_time_fd: u32,
    /// See [`canhack_core::CanHackPort::SAMPLE_POINT_OFFSET`].
    pub sample_point_offset: u32,
    /// See [`canhack_core::CanHackPort::SAMPLE_POINT_OFFSET_FD`].
    pub sample_point_offset_fd: u32,
    /// See [`canhack_core::CanHackPort::SAMPLE_TO_BIT_END`].
    pub sample_to_bit_end: u32,
    /// See [`canhack_core::CanHackPort::SAMPLE_TO_BIT_END_FD`].
    pub sample_to_bit_end_fd: u32,
}

/// Minimum cycles per bit below which sample-point placement becomes too
/// coarse to be meaningful.
const MIN_CYCLES_PER_BIT: u32 = 8;

impl BitRateConfig {
    /// Derives bit-bang timing constants for a given CPU clock.
    pub fn calculate_timing(&self, cpu_clock: HertzU32) -> Result<Timing, BitRateError> {
        if self.sample_point_percent == 0 || self.sample_point_percent >= 100 {
            return Err(BitRateError::InvalidSamplePoint);
        }

        let bit_time = cycles_per_bit(cpu_clock, self.arbitration_bitrate)?;
        let sample_point_offset = scale(bit_time, self.sample_point_percent);
        let sample_to_bit_end = bit_time - sample_point_offset;

        let (bit_time_fd, sample_point_offset_fd, sample_to_bit_end_fd) =
            if let Some(data_bitrate) = self.data_bitrate {
                if data_bitrate.raw() < self.arbitration_bitrate.raw() {
                    return Err(BitRateError::DataSlowerThanArbitration);
                }
                let bit_time_fd = cycles_per_bit(cpu_clock, data_bitrate)?;
                let sample_point_offset_fd = scale(bit_time_fd, self.sample_point_percent);
                (
                    bit_time_fd,
                    sample_point_offset_fd,
                    bit_time_fd - sample_point_offset_fd,
                )
            } else {
                (bit_time, sample_point_offset, sample_to_bit_end)
            };

        Ok(Timing {
            bit_time,
            bit_time_fd,
            sample_point_offset,
            sample_point_offset_fd,
            sample_to_bit_end,
            sample_to_bit_end_fd,
        })
    }
}

fn cycles_per_bit(cpu_clock: HertzU32, bitrate: HertzU32) -> Result<u32, BitRateError> {
    let cycles = cpu_clock.raw() / bitrate.raw();
    if cycles < MIN_CYCLES_PER_BIT {
        Err(BitRateError::RateTooFast)
    } else {
        Ok(cycles)
    }
}

fn scale(bit_time: u32, percent: u8) -> u32 {
    (bit_time * percent as u32) / 100
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn classic_only_timing() {
        let cfg = BitRateConfig {
            arbitration_bitrate: HertzU32::kHz(500),
            data_bitrate: None,
            sample_point_percent: 80,
        };
        let timing = cfg.calculate_timing(HertzU32::MHz(170)).unwrap();
        assert_eq!(timing.bit_time, 340_000);
        assert_eq!(timing.sample_point_offset, 272_000);
        assert_eq!(timing.sample_to_bit_end, 68_000);
        assert_eq!(timing.bit_time_fd, timing.bit_time);
    }

    #[test]
    fn fd_data_phase_is_faster() {
        let cfg = BitRateConfig {
            arbitration_bitrate: HertzU32::kHz(500),
            data_bitrate: Some(HertzU32::MHz(2)),
            sample_point_percent: 75,
        };
        let timing = cfg.calculate_timing(HertzU32::MHz(170)).unwrap();
        assert_eq!(timing.bit_time_fd, 85_000);
        assert!(timing.bit_time_fd < timing.bit_time);
    }

    #[test]
    fn rejects_data_slower_than_arbitration() {
        let cfg = BitRateConfig {
            arbitration_bitrate: HertzU32::kHz(500),
            data_bitrate: Some(HertzU32::kHz(250)),
            sample_point_percent: 80,
        };
        assert_eq!(
            cfg.calculate_timing(HertzU32::MHz(170)),
            Err(BitRateError::DataSlowerThanArbitration)
        );
    }

    #[test]
    fn rejects_bad_sample_point() {
        let cfg = BitRateConfig {
            arbitration_bitrate: HertzU32::kHz(500),
            data_bitrate: None,
            sample_point_percent: 100,
        };
        assert_eq!(
            cfg.calculate_timing(HertzU32::MHz(170)),
            Err(BitRateError::InvalidSamplePoint)
        );
    }
}
