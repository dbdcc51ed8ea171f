use super::*;
use core::fmt::Debug;

struct Slot<'a>(&'a [u8]);

impl<'a> Debug for Slot<'a> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        for b in self.0 {
            f.write_fmt(format_args!("{:02x}", b))?;
        }
        Ok(())
    }
}

impl<'a> PartialEq for Slot<'a> {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

macro_rules! expected_iter {
    // Iterate over the expected content, extracting the slot information
    // (32-byte hex string at the beginning, skipping empty lines). Anything
    // after the slot is a free-form annotation.
    ( $expected:expr ) => {
        $expected
            .split("\n")
            .filter(|&line| !line.trim().is_empty())
            .map(|line| {
                if line.trim().len() < 64 {
                    panic!("expected line is too short, it must start with a 32 byte hex string!");
                };
                (&line.trim()[..64], line)
            })
    };
}

/// Encode `tokens` and compare the result slot by slot against `expected`.
fn encode_and_compare(tokens: &[Token], expected: &str) {
    let encoded = encode(tokens);
    assert_eq!(encoded.len() % 32, 0, "encoding must be slot aligned");

    let mut expected_iter = expected_iter!(expected);
    for slot in encoded.chunks(32) {
        match expected_iter.next() {
            Some((expected, line)) => {
                let expected = hex::decode(expected).unwrap();
                assert_eq!(Slot(slot), Slot(&expected), "mismatch at: {}", line);
            }
            None => panic!("Expected end of data, got {:?}", Slot(slot)),
        }
    }
    assert_eq!(expected_iter.next(), None, "there are less slots than expected.");
}

fn word_left_aligned(data: &[u8]) -> [u8; 32] {
    let mut w = [0u8; 32];
    w[..data.len()].copy_from_slice(data);
    w
}

#[test]
fn static_values_are_inlined() {
    let addr: Address = "5B38Da6a701c568545dCfcB03FcB875f56beddC4".parse().unwrap();
    let expected = "
        0000000000000000000000005b38da6a701c568545dcfcb03fcb875f56beddc4
        0000000000000000000000000000000000000000000000000000000000002222
        0000000000000000000000000000000000000000000000000000000000000001
    ";
    encode_and_compare(
        &[Token::Address(addr), Token::uint(0x2222u64), Token::Bool(true)],
        expected,
    );
}

#[test]
fn bytes_are_padded() {
    let expected = "
        0000000000000000000000000000000000000000000000000000000000000020 offset
        0000000000000000000000000000000000000000000000000000000000000004 length
        a1a2a3a400000000000000000000000000000000000000000000000000000000 data
    ";
    encode_and_compare(&[Token::Bytes(vec![0xa1, 0xa2, 0xa3, 0xa4])], expected);
}

#[test]
fn solidity_docs_example() {
    // f(uint256,uint32[],bytes10,bytes) with
    // (0x123, [0x456, 0x789], "1234567890", "Hello, world!")
    let expected = "
        0000000000000000000000000000000000000000000000000000000000000123
        0000000000000000000000000000000000000000000000000000000000000080
        3132333435363738393000000000000000000000000000000000000000000000
        00000000000000000000000000000000000000000000000000000000000000e0
        0000000000000000000000000000000000000000000000000000000000000002
        0000000000000000000000000000000000000000000000000000000000000456
        0000000000000000000000000000000000000000000000000000000000000789
        000000000000000000000000000000000000000000000000000000000000000d
        48656c6c6f2c20776f726c642100000000000000000000000000000000000000
    ";
    encode_and_compare(
        &[
            Token::uint(0x123u64),
            Token::Array(vec![Token::uint(0x456u64), Token::uint(0x789u64)]),
            Token::Word(word_left_aligned(b"1234567890")),
            Token::Bytes(b"Hello, world!".to_vec()),
        ],
        expected,
    );
}

#[test]
fn dynamic_tuple_gets_an_offset() {
    let expected = "
        0000000000000000000000000000000000000000000000000000000000000020 offset of tuple
        0000000000000000000000000000000000000000000000000000000000000001
        0000000000000000000000000000000000000000000000000000000000000040 offset of bytes (relative to tuple)
        0000000000000000000000000000000000000000000000000000000000000002
        6162000000000000000000000000000000000000000000000000000000000000
    ";
    encode_and_compare(
        &[Token::Tuple(vec![Token::uint(1u64), Token::Bytes(b"ab".to_vec())])],
        expected,
    );
}

#[test]
fn static_fixed_array_is_inlined() {
    let expected = "
        0000000000000000000000000000000000000000000000000000000000000001
        0000000000000000000000000000000000000000000000000000000000000002
        0000000000000000000000000000000000000000000000000000000000000003
    ";
    encode_and_compare(
        &[
            Token::FixedArray(vec![Token::uint(1u64), Token::uint(2u64)]),
            Token::uint(3u64),
        ],
        expected,
    );
}

#[test]
fn keccak_of_empty_input() {
    assert_eq!(
        keccak256(&[]),
        "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
            .parse()
            .unwrap()
    );
}

#[test]
fn erc20_transfer_selector() {
    assert_eq!(selector("transfer(address,uint256)"), [0xa9, 0x05, 0x9c, 0xbb]);
}

#[test]
fn packed_encoding_does_not_pad_scalars() {
    let addr = Address([0x11; 20]);
    let mut out = Vec::new();
    encode_packed(
        &[
            Packed::Uint8(1),
            Packed::Address(addr),
            Packed::Uint256(2u64.into()),
            Packed::AddressArray(&[addr]),
        ],
        &mut out,
    );

    assert_eq!(out.len(), 1 + 20 + 32 + 32);
    assert_eq!(out[0], 1);
    assert_eq!(&out[1..21], &addr.0);
    assert_eq!(out[52], 2);
    assert_eq!(&out[53..65], &[0u8; 12]);
    assert_eq!(keccak256_packed(&[Packed::Bytes(&out)]), keccak256(&out));
}
