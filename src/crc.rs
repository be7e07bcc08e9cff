//! Table-driven CRC-32 used to authenticate a program body
//!
//! Reflected CRC-32 with the standard polynomial (0xEDB8_8320 in bit-reversed
//! form), seeded with all-ones and complemented on output. The table is filled
//! on first use; a zero in entry 1 means it has not been generated yet, since
//! the generated value of that entry is never zero.

/// Bit-reversed CRC-32 polynomial
pub const POLYNOMIAL: u32 = 0xEDB8_8320;

/// Value of table entry 1 once the table is generated
const TABLE_ENTRY_ONE: u32 = 0x7707_3096;

/// CRC-32 engine with a lazily generated lookup table
#[derive(Clone)]
pub struct Crc32 {
    table: [u32; 256],
}

impl Default for Crc32 {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Crc32 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Crc32")
            .field("generated", &self.is_generated())
            .finish()
    }
}

impl Crc32 {
    /// Create an engine; the table is generated on the first checksum
    pub const fn new() -> Self {
        Crc32 { table: [0; 256] }
    }

    /// Whether the lookup table has been filled
    pub fn is_generated(&self) -> bool {
        self.table[1] != 0
    }

    fn table(&mut self) -> &[u32; 256] {
        if !self.is_generated() {
            for (n, entry) in self.table.iter_mut().enumerate() {
                let mut c = n as u32;
                for _ in 0..8 {
                    c = if c & 1 != 0 { POLYNOMIAL ^ (c >> 1) } else { c >> 1 };
                }
                *entry = c;
            }
            debug_assert_eq!(self.table[1], TABLE_ENTRY_ONE);
        }
        &self.table
    }

    /// Checksum a byte slice
    pub fn checksum(&mut self, bytes: &[u8]) -> u32 {
        let table = self.table();
        let mut crc = u32::MAX;
        for &byte in bytes {
            crc = table[((crc ^ byte as u32) & 0xFF) as usize] ^ (crc >> 8);
        }
        !crc
    }

    /// Checksum a run of program words, each fed least-significant byte first
    pub fn checksum_words(&mut self, words: &[u32]) -> u32 {
        let table = self.table();
        let mut crc = u32::MAX;
        for word in words {
            for byte in word.to_le_bytes() {
                crc = table[((crc ^ byte as u32) & 0xFF) as usize] ^ (crc >> 8);
            }
        }
        !crc
    }
}

/// One-shot checksum of program words
pub fn crc32_words(words: &[u32]) -> u32 {
    Crc32::new().checksum_words(words)
}
