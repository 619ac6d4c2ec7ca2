// Every entry is the binary reverse of its index (e.g. 0b0000_0001 -> 0b1000_0000).
pub static REVERSED_BYTES: [u8; 256] = build_reversed_bytes();

const fn build_reversed_bytes() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        let mut value = 0u8;
        let mut bit = 0;
        while bit < 8 {
            if i & (1 << bit) != 0 {
                value |= 0x80 >> bit;
            }
            bit += 1;
        }
        table[i] = value;
        i += 1;
    }
    table
}

pub fn reverse_bits(b: u8) -> u8 {
    REVERSED_BYTES[b as usize]
}
