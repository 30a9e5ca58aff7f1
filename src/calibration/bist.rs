//! Built-in self-test.
//!
//! The BIST plays a short SRAM sequence through a DAC while the DAC computes a
//! checksum of the samples received on its LVDS inputs and at its FIFO output.
//! The checksums are computed separately for the even and the odd samples.
//! The test passes if both hardware checksums match the checksum computed
//! here. The hardware may report the two parity channels of a checksum in
//! reverse order, which is accepted.

use super::check_reply;
use crate::error::Result;
use ghzdac_json::Bist;

const SAMPLE_MASK: u32 = 0x3fff;

/// Minimum length in words of the BIST SRAM data.
pub const MIN_SRAM_LEN: usize = 20;

/// Serial commands that arm the checksum logic before the SRAM run.
pub const SETUP_COMMANDS: [u32; 3] = [0x0004, 0x1107, 0x1106];

/// Serial commands that read the four checksums after the SRAM run.
///
/// Each checksum is selected by one command and read one byte at a time, most
/// significant byte first.
pub fn read_commands() -> Vec<u32> {
    [0x1126, 0x1166, 0x11a6, 0x11e6]
        .into_iter()
        .flat_map(|select| [select, 0x9200, 0x9300, 0x9400, 0x9500])
        .collect()
}

/// Computes the expected BIST checksums.
///
/// Only the 14 least significant bits of each sample are used. The first
/// checksum covers the even samples and the second one the odd samples. Each
/// sample with non-zero data updates its checksum by rotating it left by one
/// bit and XORing the masked sample.
pub fn bist_checksum(samples: &[u32]) -> [u32; 2] {
    let mut checksum = [0u32; 2];
    for (j, &sample) in samples.iter().enumerate() {
        let sample = sample & SAMPLE_MASK;
        if sample != 0 {
            let c = &mut checksum[j % 2];
            *c = c.rotate_left(1) ^ sample;
        }
    }
    checksum
}

/// Builds the SRAM words played during the BIST.
///
/// Four zero words precede the samples, which are shifted into the bits of
/// the DAC under test. The data is zero padded to [`MIN_SRAM_LEN`] words.
pub fn bist_sram(samples: &[u32], shift: u32) -> Vec<u32> {
    let mut words = vec![0; 4];
    words.extend(samples.iter().map(|&s| (s & SAMPLE_MASK) << shift));
    if words.len() < MIN_SRAM_LEN {
        words.resize(MIN_SRAM_LEN, 0);
    }
    words
}

/// Decodes the four checksums from the responses to [`read_commands`].
pub fn parse_readings(responses: &[u8]) -> Result<[u32; 4]> {
    check_reply(responses, 20)?;
    let mut readings = [0; 4];
    for (reading, r) in readings.iter_mut().zip(responses.chunks_exact(5)) {
        // the first response of each group belongs to the select command
        *reading = u32::from_be_bytes([r[1], r[2], r[3], r[4]]);
    }
    Ok(readings)
}

/// Compares the hardware checksums with the expected ones.
pub fn evaluate(samples: &[u32], responses: &[u8]) -> Result<Bist> {
    let expected = bist_checksum(samples);
    let readings = parse_readings(responses)?;
    let accept = |pair: [u32; 2]| {
        let reversed = [pair[1], pair[0]];
        if reversed == expected {
            reversed
        } else {
            pair
        }
    };
    let lvds = accept([readings[0], readings[1]]);
    let fifo = accept([readings[2], readings[3]]);
    let success = lvds == expected && fifo == expected;
    if success {
        tracing::debug!(?expected, "BIST passed");
    } else {
        tracing::warn!(?expected, ?lvds, ?fifo, "BIST checksum mismatch");
    }
    Ok(Bist {
        success,
        expected,
        lvds,
        fifo,
    })
}

#[cfg(test)]
mod test {
    use super::*;

    fn responses(readings: [u32; 4]) -> Vec<u8> {
        readings
            .iter()
            .flat_map(|r| std::iter::once(0x5a).chain(r.to_be_bytes()))
            .collect()
    }

    #[test]
    fn checksum() {
        assert_eq!(bist_checksum(&[1, 0, 1, 0]), [3, 0]);
        assert_eq!(bist_checksum(&[0, 2]), [0, 2]);
        // samples with zero data do not update the checksum
        assert_eq!(bist_checksum(&[1, 0, 0, 0, 0x4000, 0]), [1, 0]);
        assert_eq!(bist_checksum(&[1, 0, 0x3fff, 0]), [0x3ffd, 0]);
        assert_eq!(bist_checksum(&[]), [0, 0]);
    }

    #[test]
    fn checksum_rotation_wraps() {
        let samples = vec![0x3ffe; 2 * 40];
        let [even, odd] = bist_checksum(&samples);
        assert_eq!(even, odd);
        let mut expected = 0u32;
        for _ in 0..40 {
            expected = expected.rotate_left(1) ^ 0x3ffe;
        }
        assert_eq!(even, expected);
    }

    #[test]
    fn full_scale_samples_change_checksum() {
        let samples = [0x3fff, 0, 0x3fff, 0];
        let checksum = bist_checksum(&samples);
        assert_eq!(checksum, [0x4001, 0]);
        assert_ne!(checksum, [0, 0]);
        assert_eq!(bist_checksum(&samples), checksum);
    }

    #[test]
    fn sram_data() {
        let words = bist_sram(&[0x1, 0x7fff], 14);
        assert_eq!(words.len(), 20);
        assert_eq!(&words[..6], &[0, 0, 0, 0, 1 << 14, 0x3fff << 14]);
        assert!(words[6..].iter().all(|&w| w == 0));
        assert_eq!(bist_sram(&[1; 30], 0).len(), 34);
    }

    #[test]
    fn commands() {
        let commands = read_commands();
        assert_eq!(commands.len(), 20);
        assert_eq!(&commands[..5], &[0x1126, 0x9200, 0x9300, 0x9400, 0x9500]);
        assert_eq!(commands[15], 0x11e6);
    }

    #[test]
    fn readings() {
        let r = parse_readings(&responses([0x01020304, 5, 6, 7])).unwrap();
        assert_eq!(r, [0x01020304, 5, 6, 7]);
        assert!(parse_readings(&[0; 19]).is_err());
    }

    #[test]
    fn pass_and_reversed() {
        let samples = [1, 0, 1, 2];
        let expected = bist_checksum(&samples);
        let bist = evaluate(
            &samples,
            &responses([expected[0], expected[1], expected[1], expected[0]]),
        )
        .unwrap();
        assert!(bist.success);
        assert_eq!(bist.fifo, expected);

        let bist = evaluate(&samples, &responses([expected[0], expected[1], 0, 0])).unwrap();
        assert!(!bist.success);
        assert_eq!(bist.lvds, expected);
        assert_eq!(bist.fifo, [0, 0]);
    }
}
