//! Decompression of the legacy unicode-filename extension field.
//!
//! A unicode name field holds the legacy (OEM) name, a NUL, then a
//! compact replay stream that reconstructs the full UTF-16LE name. The
//! stream is driven by 2-bit opcodes, read most-significant pair first
//! from each freshly fetched flag byte; the bit-consumption order is
//! part of the format and must not change.
//!
//! The stream ends whenever the supplemental bytes run out, including
//! mid-flag-byte: encoders pad the final flag byte's unused slots, so
//! leftover opcodes are not an error. Running past either input while
//! an opcode is executing substitutes `b'?'` so decoding always
//! terminates, but the result is discarded (the caller falls back to
//! the legacy name half).

/// Decodes the `(standard, supplemental)` halves of a unicode name
/// field into a string, or `None` when the stream was malformed.
pub fn decode_filename(standard: &[u8], supplemental: &[u8]) -> Option<String> {
    let mut dec = Decoder {
        standard,
        supplemental,
        std_pos: 0,
        sup_pos: 0,
        failed: false,
    };
    let units = dec.run()?;
    Some(String::from_utf16_lossy(&units))
}

struct Decoder<'a> {
    standard: &'a [u8],
    supplemental: &'a [u8],
    std_pos: usize,
    sup_pos: usize,
    failed: bool,
}

impl Decoder<'_> {
    fn run(&mut self) -> Option<Vec<u16>> {
        // The first supplemental byte is the shared high-byte default.
        if self.supplemental.is_empty() {
            return None;
        }
        let high_default = u16::from(self.supplemental[0]) << 8;
        self.sup_pos = 1;

        let mut out = Vec::new();
        // Opcodes are consumed most significant pair first, and the
        // exhaustion check runs before every opcode: a final flag byte
        // whose remaining slots have no operands left is padding, not
        // corruption.
        let mut flag_byte = 0u8;
        let mut flag_bits = 0u8;
        while self.sup_pos < self.supplemental.len() {
            if flag_bits == 0 {
                flag_byte = self.next_sup();
                flag_bits = 8;
                continue;
            }
            let opcode = flag_byte >> 6;
            flag_byte <<= 2;
            flag_bits -= 2;
            match opcode {
                0 => {
                    let low = self.next_sup();
                    out.push(u16::from(low));
                }
                1 => {
                    let low = self.next_sup();
                    out.push(u16::from(low) | high_default);
                }
                2 => {
                    let low = self.next_sup();
                    let high = self.next_sup();
                    out.push(u16::from(low) | (u16::from(high) << 8));
                }
                _ => {
                    let length = self.next_sup();
                    if length & 0x80 != 0 {
                        let correction = self.next_sup();
                        for _ in 0..(length & 0x7F) + 2 {
                            let low = self.next_std().wrapping_add(correction);
                            out.push(u16::from(low) | high_default);
                        }
                    } else {
                        for _ in 0..u16::from(length) + 2 {
                            out.push(u16::from(self.next_std()));
                        }
                    }
                }
            }
        }

        if self.failed {
            None
        } else {
            Some(out)
        }
    }

    fn next_sup(&mut self) -> u8 {
        match self.supplemental.get(self.sup_pos) {
            Some(&b) => {
                self.sup_pos += 1;
                b
            }
            None => {
                self.failed = true;
                b'?'
            }
        }
    }

    fn next_std(&mut self) -> u8 {
        match self.standard.get(self.std_pos) {
            Some(&b) => {
                self.std_pos += 1;
                b
            }
            None => {
                self.failed = true;
                b'?'
            }
        }
    }
}
