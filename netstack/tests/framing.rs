//! Property tests for frame reassembly.
//!
//! However the transport chunks the byte stream, the decoder must produce the
//! same datagrams, in order, as if the whole stream arrived at once.

use proptest::prelude::*;

use netstack::framing::{self, FrameDecoder};

fn datagrams() -> impl Strategy<Value = Vec<Vec<u8>>> {
    // Bias towards the delimiter and escape bytes.
    let byte = prop_oneof![
        3 => any::<u8>(),
        1 => Just(framing::END),
        1 => Just(framing::ESC),
    ];
    prop::collection::vec(prop::collection::vec(byte, 1..48), 0..8)
}

proptest! {
    #[test]
    fn chunking_does_not_change_output(
        frames in datagrams(),
        cuts in prop::collection::vec(1usize..24, 0..40),
    ) {
        let stream: Vec<u8> = frames.iter().flat_map(|f| framing::encode(f)).collect();

        let mut decoder = FrameDecoder::new();
        let mut decoded = Vec::new();
        let mut rest = &stream[..];
        for cut in cuts {
            let (chunk, tail) = rest.split_at(cut.min(rest.len()));
            decoded.extend(decoder.push(chunk));
            rest = tail;
        }
        decoded.extend(decoder.push(rest));

        prop_assert_eq!(decoded, frames);
        prop_assert_eq!(decoder.pending(), 0);
        prop_assert_eq!(decoder.malformed(), 0);
    }

    #[test]
    fn encoded_body_never_contains_a_bare_delimiter(frame in prop::collection::vec(any::<u8>(), 0..64)) {
        let encoded = framing::encode(&frame);
        let body = &encoded[1..encoded.len() - 1];
        prop_assert!(!body.contains(&framing::END));
        prop_assert_eq!(framing::unescape(body), Some(frame));
    }
}
