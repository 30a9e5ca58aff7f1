//! SRAM and memory packetizer.
//!
//! The SRAM is written in units of [`sram_write_pkt_len`] words called
//! "derps", one per Ethernet packet. A write packet contains a 2-byte
//! little-endian derp index followed by the words of the derp, least
//! significant byte first. The firmware assumes that the 8 least significant
//! bits of the SRAM write address are zero, so incrementing the derp index by
//! one advances the write address by one full derp, regardless of how many
//! words the packet carries.
//!
//! The SRAM is split in two pages, so that one page can be written while the
//! other one is running. The word "page" refers only to this split.
//!
//! [`sram_write_pkt_len`]: crate::variant::BoardCapabilities::sram_write_pkt_len

use crate::error::{CapacityViolation, Error, Result};
use crate::memory::MemorySequence;
use crate::variant::{BoardCapabilities, Variant};
use bytes::{BufMut, Bytes, BytesMut};

/// Builds the packet that writes one SRAM derp.
///
/// `words` must contain between 1 and `sram_write_pkt_len` words. If less than
/// a full derp is given, the rest of the derp is filled with zeros.
pub fn write_sram_packet(derp: usize, words: &[u32], caps: &BoardCapabilities) -> Result<Bytes> {
    let derps = caps.sram_write_derps();
    if derp >= derps {
        return Err(CapacityViolation::SramDerpOutOfRange { derp, derps }.into());
    }
    if words.is_empty() || words.len() > caps.sram_write_pkt_len {
        return Err(Error::invalid_argument(format!(
            "tried to write {} words to an SRAM derp",
            words.len()
        )));
    }
    let len = 2 + 4 * caps.sram_write_pkt_len;
    let mut packet = BytesMut::with_capacity(len);
    // derps fit in 16 bits for every validated set of capabilities
    packet.put_u16_le(derp as u16);
    for &word in words {
        packet.put_u32_le(word);
    }
    packet.resize(len, 0);
    Ok(packet.freeze())
}

/// Splits SRAM data into derp write packets.
///
/// `data` holds 4 bytes per SRAM word. A trailing partial word is zero
/// padded. The first derp written is the first derp of `start_page`.
pub fn packetize_sram(data: &[u8], start_page: usize, caps: &BoardCapabilities) -> Result<Vec<Bytes>> {
    let first_derp = start_page * caps.sram_page_len / caps.sram_write_pkt_len;
    let derps = caps.sram_write_derps();
    if first_derp >= derps {
        return Err(CapacityViolation::SramDerpOutOfRange {
            derp: first_derp,
            derps,
        }
        .into());
    }
    data.chunks(4 * caps.sram_write_pkt_len)
        .enumerate()
        .map(|(j, chunk)| {
            let words = sram_words(chunk);
            write_sram_packet(first_derp + j, &words, caps)
        })
        .collect()
}

/// Converts little-endian SRAM bytes into words.
///
/// The missing high bytes of a trailing partial word are zero.
pub fn sram_words(data: &[u8]) -> Vec<u32> {
    data.chunks(4)
        .map(|b| {
            let mut word = [0; 4];
            word[..b.len()].copy_from_slice(b);
            u32::from_le_bytes(word)
        })
        .collect()
}

/// Converts SRAM words into little-endian bytes.
pub fn sram_bytes(words: &[u32]) -> Vec<u8> {
    words.iter().flat_map(|w| w.to_le_bytes()).collect()
}

/// Builds the packet that writes a memory sequence to one memory page.
///
/// The packet contains the page number followed by the 3-byte little-endian
/// words, zero padded to a full page. Sequences written to a page other than
/// 0 have their SRAM addresses relocated to the same SRAM page. Jump table
/// builds have no memory sequencer and reject this operation.
pub fn packetize_memory(seq: &MemorySequence, page: usize, variant: &Variant) -> Result<Bytes> {
    variant.require_legacy("memory write")?;
    let caps = variant.capabilities();
    if seq.len() > caps.mem_page_len {
        return Err(CapacityViolation::ProgramTooLong {
            len: seq.len(),
            max: caps.mem_page_len,
        }
        .into());
    }
    let page_byte = u8::try_from(page)
        .ok()
        .filter(|&p| usize::from(p) < caps.mem_len / caps.mem_page_len)
        .ok_or_else(|| Error::invalid_argument(format!("memory page {page} out of range")))?;
    let shifted;
    let seq = if page != 0 {
        shifted = seq.shift_for_page(page, caps.sram_page_len)?;
        &shifted
    } else {
        seq
    };
    let len = 1 + 3 * caps.mem_page_len;
    let mut packet = BytesMut::with_capacity(len);
    packet.put_u8(page_byte);
    for &word in seq.words() {
        packet.put_uint_le(u32::from(word).into(), 3);
    }
    packet.resize(len, 0);
    Ok(packet.freeze())
}

#[cfg(test)]
mod test {
    use super::*;

    fn caps() -> BoardCapabilities {
        *Variant::for_build(7).unwrap().capabilities()
    }

    #[test]
    fn derp_packet() {
        let packet = write_sram_packet(0x0102, &[0x04030201, 0x08070605], &caps()).unwrap();
        assert_eq!(packet.len(), 1026);
        assert_eq!(&packet[..10], &[0x02, 0x01, 1, 2, 3, 4, 5, 6, 7, 8]);
        assert!(packet[10..].iter().all(|&b| b == 0));
    }

    #[test]
    fn derp_packet_checks() {
        assert!(matches!(
            write_sram_packet(40, &[0], &caps()),
            Err(Error::Capacity(CapacityViolation::SramDerpOutOfRange { derp: 40, derps: 40 }))
        ));
        assert!(write_sram_packet(0, &[], &caps()).is_err());
        assert!(write_sram_packet(0, &[0; 257], &caps()).is_err());
        assert!(write_sram_packet(39, &[0; 256], &caps()).is_ok());
    }

    #[test]
    fn packetize_pages() {
        let data = sram_bytes(&(0..300).collect::<Vec<u32>>());
        let packets = packetize_sram(&data, 0, &caps()).unwrap();
        assert_eq!(packets.len(), 2);
        assert_eq!(&packets[0][..2], &[0, 0]);
        assert_eq!(&packets[1][..2], &[1, 0]);
        // words 256..300 followed by zero padding
        assert_eq!(&packets[1][2..6], &256u32.to_le_bytes());
        assert!(packets[1][2 + 44 * 4..].iter().all(|&b| b == 0));

        // page 1 starts at derp 5120 / 256 = 20
        let packets = packetize_sram(&data, 1, &caps()).unwrap();
        assert_eq!(&packets[0][..2], &[20, 0]);
        assert_eq!(&packets[1][..2], &[21, 0]);
    }

    #[test]
    fn packetize_range() {
        assert!(packetize_sram(&[0; 4], 2, &caps()).is_err());
        // a full SRAM fits, one more word does not
        let full = vec![0; 4 * 10240];
        assert_eq!(packetize_sram(&full, 0, &caps()).unwrap().len(), 40);
        let over = vec![0; 4 * 10241];
        assert!(packetize_sram(&over, 0, &caps()).is_err());
        assert!(packetize_sram(&[], 0, &caps()).unwrap().is_empty());
    }

    #[test]
    fn partial_words_are_padded() {
        let packets = packetize_sram(&[1], 0, &caps()).unwrap();
        assert_eq!(packets.len(), 1);
        assert_eq!(&packets[0][..4], &[0, 0, 1, 0]);
        assert!(packets[0][3..].iter().all(|&b| b == 0));

        let data: Vec<u8> = (0..1023).map(|j| j as u8).collect();
        let packets = packetize_sram(&data, 0, &caps()).unwrap();
        assert_eq!(packets.len(), 1);
        assert_eq!(&packets[0][2..1025], &data[..]);
        assert_eq!(packets[0][1025], 0);

        let packets = packetize_sram(&[0xff; 1025], 0, &caps()).unwrap();
        assert_eq!(packets.len(), 2);
        assert_eq!(&packets[1][2..7], &[0xff, 0, 0, 0, 0]);
        assert_eq!(sram_words(&[1, 2, 3, 4, 5]), vec![0x04030201, 5]);
    }

    #[test]
    fn memory_packet() {
        let v = Variant::for_build(7).unwrap();
        let seq = MemorySequence::from_raw(&[0x800000, 0xa00063, 0xc00000]).unwrap();
        let packet = packetize_memory(&seq, 0, &v).unwrap();
        assert_eq!(packet.len(), 769);
        assert_eq!(
            &packet[..10],
            &[0, 0x00, 0x00, 0x80, 0x63, 0x00, 0xa0, 0x00, 0x00, 0xc0]
        );
        let packet = packetize_memory(&seq, 1, &v).unwrap();
        // SRAM addresses relocated by one SRAM page (5120 = 0x1400)
        assert_eq!(
            &packet[..7],
            &[1, 0x00, 0x14, 0x80, 0x63, 0x14, 0xa0]
        );
        assert!(packetize_memory(&seq, 2, &v).is_err());
    }

    #[test]
    fn memory_packet_checks() {
        let v = Variant::for_build(8).unwrap();
        let long = MemorySequence::from_raw(&[0; 257]).unwrap();
        assert!(matches!(
            packetize_memory(&long, 0, &v),
            Err(Error::Capacity(CapacityViolation::ProgramTooLong { len: 257, max: 256 }))
        ));
        let seq = MemorySequence::new().no_op();
        assert!(matches!(
            packetize_memory(&seq, 0, &Variant::for_build(14).unwrap()),
            Err(Error::Unsupported { .. })
        ));
    }
}
