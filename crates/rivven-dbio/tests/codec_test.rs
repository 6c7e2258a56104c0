//! Tests for rivven-dbio codecs and the restriction pair codec

use bytes::{Bytes, BytesMut};
use proptest::prelude::*;
use rivven_dbio::codec::{decode_from_bytes, encode_to_bytes};
use rivven_dbio::prelude::*;

fn nested_roundtrip<T, C: Codec<T>>(codec: &C, value: &T, trailer: &[u8]) -> (T, Bytes) {
    let mut buf = BytesMut::new();
    codec.encode(value, &mut buf, Context::Nested).unwrap();
    buf.extend_from_slice(trailer);
    let mut bytes = buf.freeze();
    let decoded = codec.decode(&mut bytes, Context::Nested).unwrap();
    (decoded, bytes)
}

proptest! {
    #[test]
    fn string_i64_pair_roundtrips(element in ".*", restriction in any::<i64>()) {
        let codec = PairCodec::of(StringCodec, I64Codec);
        let pair = RestrictionPair::new(element, restriction);

        let bytes = encode_to_bytes(&codec, &pair).unwrap();
        prop_assert_eq!(decode_from_bytes(&codec, bytes).unwrap(), pair);
    }

    #[test]
    fn bytes_string_pair_roundtrips(
        element in proptest::collection::vec(any::<u8>(), 0..256),
        restriction in "\\PC*",
    ) {
        let codec = PairCodec::of(BytesCodec, StringCodec);
        let pair = RestrictionPair::new(Bytes::from(element), restriction);

        let bytes = encode_to_bytes(&codec, &pair).unwrap();
        prop_assert_eq!(decode_from_bytes(&codec, bytes).unwrap(), pair);
    }

    #[test]
    fn nested_pair_leaves_following_bytes(
        element in any::<u64>(),
        restriction in ".*",
        trailer in proptest::collection::vec(any::<u8>(), 0..16),
    ) {
        let codec = PairCodec::of(VarU64Codec, StringCodec);
        let pair = RestrictionPair::new(element, restriction);

        let (decoded, rest) = nested_roundtrip(&codec, &pair, &trailer);
        prop_assert_eq!(decoded, pair);
        prop_assert_eq!(rest.as_ref(), trailer.as_slice());
    }

    #[test]
    fn truncated_pair_never_panics(element in ".+", restriction in any::<i64>(), cut in 0usize..8) {
        let codec = PairCodec::of(StringCodec, I64Codec);
        let bytes = encode_to_bytes(&codec, &RestrictionPair::new(element, restriction)).unwrap();
        let truncated = bytes.slice(..bytes.len() - 1 - cut.min(bytes.len() - 1));

        let err = decode_from_bytes(&codec, truncated).unwrap_err();
        let is_decode = matches!(err, Error::Decode { .. });
        prop_assert!(is_decode);
    }
}

#[test]
fn test_outer_pair_wire_layout() {
    let codec = PairCodec::of(StringCodec, BytesCodec);
    let pair = RestrictionPair::new("key".to_string(), Bytes::from_static(b"range"));

    let bytes = encode_to_bytes(&codec, &pair).unwrap();
    assert_eq!(bytes.as_ref(), b"\x03keyrange");
}

#[test]
fn test_nested_pair_frames_restriction() {
    let codec = PairCodec::of(StringCodec, BytesCodec);
    let pair = RestrictionPair::new("key".to_string(), Bytes::from_static(b"range"));

    let mut buf = BytesMut::new();
    codec.encode(&pair, &mut buf, Context::Nested).unwrap();
    assert_eq!(buf.as_ref(), b"\x03key\x05range");
}

#[test]
fn test_null_pair_cannot_be_encoded() {
    let mut buf = BytesMut::new();

    let codec = PairCodec::of(StringCodec, I64Codec);
    let err = codec
        .encode_nullable(None, &mut buf, Context::Outer)
        .unwrap_err();
    assert!(matches!(err, Error::Encode { .. }));
    assert!(err.to_string().contains("null RestrictionPair"));

    let codec = PairCodec::of(BytesCodec, JsonCodec::<Vec<u32>>::new());
    assert!(codec
        .encode_nullable(None, &mut buf, Context::Nested)
        .is_err());
    assert!(buf.is_empty());
}

#[test]
fn test_pair_of_pairs() {
    let inner = PairCodec::of(StringCodec, I64Codec);
    let codec = PairCodec::of(inner.clone(), inner);
    let pair = RestrictionPair::new(
        RestrictionPair::new("a".to_string(), 1),
        RestrictionPair::new("b".to_string(), 2),
    );

    let bytes = encode_to_bytes(&codec, &pair).unwrap();
    assert_eq!(decode_from_bytes(&codec, bytes).unwrap(), pair);
    assert_eq!(
        codec.name(),
        "PairCodec(PairCodec(StringCodec, I64Codec), PairCodec(StringCodec, I64Codec))"
    );
}

#[test]
fn test_trailing_bytes_rejected() {
    let codec = PairCodec::of(StringCodec, I64Codec);
    let mut bytes = BytesMut::from(
        encode_to_bytes(&codec, &RestrictionPair::new("x".to_string(), 7))
            .unwrap()
            .as_ref(),
    );
    bytes.extend_from_slice(b"!");

    assert!(decode_from_bytes(&codec, bytes.freeze()).is_err());
}

#[test]
fn test_pair_conversions() {
    let pair: RestrictionPair<&str, u64> = ("k", 9).into();
    assert_eq!(pair.into_parts(), ("k", 9));
}
