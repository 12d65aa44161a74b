//! SLIP framing for the TCP relay link.
//!
//! Each frame travels as `END payload END` with `END`/`ESC` bytes inside the
//! payload escaped. The decoder is incremental: feed it whatever the socket
//! returned and collect the frames it completes.

pub const END: u8 = 0xC0;
pub const ESC: u8 = 0xDB;
pub const ESC_END: u8 = 0xDC;
pub const ESC_ESC: u8 = 0xDD;

/// Frames longer than this are discarded; aggregator frames are tiny.
pub const MAX_FRAME: usize = 512;

#[derive(Debug, Default)]
pub struct SlipDecoder {
    buf: Vec<u8>,
    esc: bool,
    overflow: bool,
}

impl SlipDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push bytes, returning any completed frames.
    pub fn push(&mut self, data: &[u8]) -> Vec<Vec<u8>> {
        let mut frames = Vec::new();
        for &b in data {
            if self.esc {
                self.esc = false;
                match b {
                    ESC_END => self.put(END),
                    ESC_ESC => self.put(ESC),
                    // invalid escape: the frame is corrupt
                    _ => self.overflow = true,
                }
                continue;
            }
            match b {
                END => {
                    let frame = std::mem::take(&mut self.buf);
                    if !self.overflow && !frame.is_empty() {
                        frames.push(frame);
                    }
                    self.overflow = false;
                }
                ESC => self.esc = true,
                _ => self.put(b),
            }
        }
        frames
    }

    fn put(&mut self, b: u8) {
        if self.buf.len() >= MAX_FRAME {
            self.overflow = true;
        } else {
            self.buf.push(b);
        }
    }
}

pub fn slip_encode(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 2);
    out.push(END);
    for &b in payload {
        match b {
            END => out.extend_from_slice(&[ESC, ESC_END]),
            ESC => out.extend_from_slice(&[ESC, ESC_ESC]),
            _ => out.push(b),
        }
    }
    out.push(END);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_delimiters() {
        assert_eq!(
            slip_encode(&[1, END, 2, ESC]),
            vec![END, 1, ESC, ESC_END, 2, ESC, ESC_ESC, END]
        );
    }

    #[test]
    fn decoder_handles_split_reads() {
        let wire = slip_encode(&[7, 0, 3, END, 50]);
        let mut dec = SlipDecoder::new();
        let (a, b) = wire.split_at(4);
        assert!(dec.push(a).is_empty());
        assert_eq!(dec.push(b), vec![vec![7, 0, 3, END, 50]]);
    }

    #[test]
    fn back_to_back_frames() {
        let mut wire = slip_encode(&[1, 0, 2]);
        wire.extend(slip_encode(&[2, 0, 2]));
        let mut dec = SlipDecoder::new();
        assert_eq!(dec.push(&wire), vec![vec![1, 0, 2], vec![2, 0, 2]]);
    }

    #[test]
    fn oversize_and_corrupt_frames_are_dropped() {
        let mut dec = SlipDecoder::new();
        let big = vec![1u8; MAX_FRAME + 10];
        assert!(dec.push(&slip_encode(&big)).is_empty());
        assert!(dec.push(&[END, 1, ESC, 0x00, 2, END]).is_empty());
        assert_eq!(dec.push(&slip_encode(&[4, 0, 1, 90])), vec![vec![4, 0, 1, 90]]);
    }
}
