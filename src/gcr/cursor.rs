use crate::gcr::{RawTrack, SYNC_BITS};

/// A read position on a raw track, addressed in bits.  The track is treated
/// as a circular bit stream, so reading past the last bit continues at the
/// first one.
pub struct BitCursor<'a> {
    data: &'a [u8],
    bits: usize,
    position: usize,
}

impl<'a> BitCursor<'a> {
    pub fn new(track: &'a RawTrack, position: usize) -> BitCursor<'a> {
        let bits = track.bits();
        BitCursor {
            data: track.data(),
            bits,
            position: wrap(position, bits),
        }
    }

    #[inline]
    pub fn position(&self) -> usize {
        self.position
    }

    /// The next bit.  A track with no bits reads as all zeros.
    pub fn next_bit(&mut self) -> u8 {
        if self.bits == 0 {
            return 0;
        }
        let byte = self.data[self.position >> 3];
        let bit = (byte >> (7 - (self.position & 7))) & 1;
        self.position += 1;
        if self.position == self.bits {
            self.position = 0;
        }
        bit
    }

    pub fn next_byte(&mut self) -> u8 {
        (0..8).fold(0, |byte, _| (byte << 1) | self.next_bit())
    }

    fn step_back(&mut self) {
        self.position = if self.position == 0 {
            self.bits - 1
        } else {
            self.position - 1
        };
    }

    /// Scan forward at most `max_bits` bits for a sync mark: a run of at
    /// least ten one bits terminated by a zero bit.  On success the cursor
    /// rests on that zero bit (the first bit following the sync) and the
    /// number of bits consumed to get there is returned.
    pub fn seek_sync(&mut self, max_bits: usize) -> Option<usize> {
        if self.bits == 0 {
            return None;
        }
        let mut ones = 0;
        for consumed in 1..=max_bits {
            if self.next_bit() == 1 {
                ones += 1;
            } else if ones >= SYNC_BITS {
                self.step_back();
                return Some(consumed - 1);
            } else {
                ones = 0;
            }
        }
        None
    }
}

/// A write position on a raw track.  Bits outside the ones written are left
/// untouched, so a block can be laid down at any bit alignment.
pub struct BitWriter<'a> {
    data: &'a mut [u8],
    bits: usize,
    position: usize,
}

impl<'a> BitWriter<'a> {
    pub fn new(track: &'a mut RawTrack, position: usize) -> BitWriter<'a> {
        let bits = track.bits();
        BitWriter {
            data: track.data_mut(),
            bits,
            position: wrap(position, bits),
        }
    }

    pub fn put_bit(&mut self, bit: u8) {
        if self.bits == 0 {
            return;
        }
        let mask = 0x80 >> (self.position & 7);
        let byte = &mut self.data[self.position >> 3];
        if bit != 0 {
            *byte |= mask;
        } else {
            *byte &= !mask;
        }
        self.position += 1;
        if self.position == self.bits {
            self.position = 0;
        }
    }

    pub fn put_byte(&mut self, byte: u8) {
        for shift in (0..8).rev() {
            self.put_bit((byte >> shift) & 1);
        }
    }
}

#[inline]
fn wrap(position: usize, bits: usize) -> usize {
    if bits == 0 {
        0
    } else {
        position % bits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_at_odd_alignment() {
        let mut track = RawTrack::new(0, vec![0; 4]);
        {
            let mut writer = BitWriter::new(&mut track, 3);
            writer.put_byte(0xa5);
        }
        assert_eq!(track.data(), &[0x14, 0xa0, 0x00, 0x00]);
        let mut cursor = BitCursor::new(&track, 3);
        assert_eq!(cursor.next_byte(), 0xa5);
        assert_eq!(cursor.position(), 11);
    }

    #[test]
    fn test_wraparound() {
        let mut track = RawTrack::new(0, vec![0; 2]);
        {
            let mut writer = BitWriter::new(&mut track, 12);
            writer.put_byte(0xff);
        }
        assert_eq!(track.data(), &[0xf0, 0x0f]);
        let mut cursor = BitCursor::new(&track, 12);
        assert_eq!(cursor.next_byte(), 0xff);
        assert_eq!(cursor.position(), 4);
    }

    #[test]
    fn test_sync_across_track_end() {
        // Thirteen one bits straddling the end of the track, then a zero.
        let track = RawTrack::new(0, vec![0xfe, 0x00, 0x00, 0x3f]);
        let mut cursor = BitCursor::new(&track, 16);
        assert_eq!(cursor.seek_sync(32), Some(23));
        assert_eq!(cursor.position(), 7);
    }

    #[test]
    fn test_short_run_is_not_sync() {
        let track = RawTrack::new(0, vec![0xff, 0x80, 0x00, 0x00]);
        let mut cursor = BitCursor::new(&track, 0);
        assert_eq!(cursor.seek_sync(32), None);
    }

    #[test]
    fn test_empty_track() {
        let mut track = RawTrack::new(0, vec![]);
        BitWriter::new(&mut track, 5).put_byte(0xff);
        let mut cursor = BitCursor::new(&track, 5);
        assert_eq!(cursor.next_byte(), 0);
        assert_eq!(cursor.position(), 0);
        assert_eq!(cursor.seek_sync(32), None);
    }
}
