// the high bit in the first byte corresponds to piece index 0
#[derive(PartialEq, Eq, Debug, Clone)]
pub struct Bitfield {
    bytes: Vec<u8>,
    num_pieces: usize,
}

impl Bitfield {
    pub fn new(num_pieces: usize) -> Self {
        Bitfield {
            bytes: vec![0; num_pieces.div_ceil(8)],
            num_pieces,
        }
    }

    // the payload is cut or zero padded to the size needed by num_pieces, spare bits are cleared
    pub fn from_payload(payload: &[u8], num_pieces: usize) -> Self {
        let mut bitfield = Bitfield::new(num_pieces);
        let len = bitfield.bytes.len().min(payload.len());
        bitfield.bytes[..len].copy_from_slice(&payload[..len]);
        let spare_bits = bitfield.bytes.len() * 8 - num_pieces;
        if spare_bits > 0 {
            if let Some(last) = bitfield.bytes.last_mut() {
                *last &= 0xff << spare_bits;
            }
        }
        bitfield
    }

    // panics if index >= num_pieces
    pub fn has_piece(&self, index: usize) -> bool {
        assert!(
            index < self.num_pieces,
            "piece index {index} out of bitfield range {}",
            self.num_pieces
        );
        let mask: u8 = 0b10000000 >> (index % 8);
        self.bytes[index / 8] & mask != 0
    }

    // panics if index >= num_pieces
    pub fn set_piece(&mut self, index: usize) {
        assert!(
            index < self.num_pieces,
            "piece index {index} out of bitfield range {}",
            self.num_pieces
        );
        let mask: u8 = 0b10000000 >> (index % 8);
        self.bytes[index / 8] |= mask;
    }

    pub fn num_pieces(&self) -> usize {
        self.num_pieces
    }

    pub fn count(&self) -> usize {
        self.bytes.iter().map(|b| b.count_ones() as usize).sum()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::Bitfield;

    #[test]
    fn decode_bitfield_test() {
        let bitfield = Bitfield::from_payload(&[0b10000001, 0b00001100], 16);
        let bits: Vec<bool> = (0..16).map(|i| bitfield.has_piece(i)).collect();
        assert_eq!(
            bits,
            vec![
                true, false, false, false, false, false, false, true, // byte 1
                false, false, false, false, true, true, false, false // byte 2
            ]
        );
        assert_eq!(bitfield.count(), 4);
    }

    #[test]
    fn set_then_has() {
        let mut bitfield = Bitfield::new(19);
        for i in [0, 7, 8, 18] {
            bitfield.set_piece(i);
        }
        for i in 0..19 {
            assert_eq!(bitfield.has_piece(i), [0, 7, 8, 18].contains(&i), "index {i}");
        }
        assert_eq!(bitfield.as_bytes(), &[0b10000001, 0b10000000, 0b00100000]);
    }

    #[test]
    fn set_piece_keeps_other_bits() {
        let mut bitfield = Bitfield::from_payload(&[0b01010100], 6);
        bitfield.set_piece(0);
        assert_eq!(bitfield.as_bytes(), &[0b11010100]);
        bitfield.set_piece(1);
        assert_eq!(bitfield.as_bytes(), &[0b11010100]);
    }

    #[test]
    fn short_payload_is_padded() {
        let bitfield = Bitfield::from_payload(&[0xff], 12);
        assert_eq!(bitfield.as_bytes(), &[0xff, 0x00]);
        assert!(bitfield.has_piece(7));
        assert!(!bitfield.has_piece(8));
    }

    #[test]
    fn long_payload_is_cut_and_spare_bits_cleared() {
        let bitfield = Bitfield::from_payload(&[0xff, 0xff, 0xff], 10);
        assert_eq!(bitfield.as_bytes(), &[0xff, 0b11000000]);
        assert_eq!(bitfield.count(), 10);
        assert_eq!(bitfield.num_pieces(), 10);
    }

    #[test]
    #[should_panic]
    fn out_of_range_query_panics() {
        let bitfield = Bitfield::new(3);
        bitfield.has_piece(3);
    }
}
