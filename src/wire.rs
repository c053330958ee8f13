// Wire-format arithmetic used at generation time.
//
// The statement generator precomputes tag keys and constant sizes with
// these functions so the emitted write and size passes agree on every
// byte. varint_len is the single canonical length algorithm; nothing
// else in the crate counts 7-bit groups.

/// Protobuf wire types as encoded in the low three bits of a tag.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireType {
    Varint = 0,
    Fixed64 = 1,
    LengthDelimited = 2,
    Fixed32 = 5,
}

/// Encode a field number and wire type into a tag key.
pub const fn make_tag(field_number: u32, wire_type: WireType) -> u32 {
    (field_number << 3) | wire_type as u32
}

/// Number of 7-bit groups needed to encode `value` as a varint.
pub const fn varint_len(value: u64) -> usize {
    // 1 + floor(bits/7); a zero value still takes one byte.
    ((((value | 1).leading_zeros() ^ 63) * 9 + 73) / 64) as usize
}

pub const fn zigzag32(value: i32) -> u32 {
    ((value << 1) ^ (value >> 31)) as u32
}

pub const fn zigzag64(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

#[cfg(test)]
pub(crate) const fn unzigzag32(value: u32) -> i32 {
    ((value >> 1) as i32) ^ -((value & 1) as i32)
}

#[cfg(test)]
pub(crate) const fn unzigzag64(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

/// Append `value` as a varint; used by tests to check worked examples.
#[cfg(test)]
pub(crate) fn encode_varint(mut value: u64, out: &mut Vec<u8>) {
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            break;
        }
        out.push(byte | 0x80);
    }
}
