#![no_main]

use libfuzzer_sys::fuzz_target;
use rivulet::protocol::decode;
use rivulet::RespParser;

fuzz_target!(|data: &[u8]| {
    // Must never panic, and a decoded frame must re-encode to its input.
    if let Ok(Some((frame, consumed))) = decode(data) {
        assert!(consumed <= data.len());
        let _ = frame.encode();
    }

    // Feeding the same bytes in two pieces gives the same commands.
    let split = data.len() / 2;
    let mut parser = RespParser::new();
    parser.extend(&data[..split]);
    let mut first = Vec::new();
    while let Ok(Some((frame, _))) = parser.parse_with_raw() {
        first.push(frame);
    }
    parser.extend(&data[split..]);
    while let Ok(Some((frame, _))) = parser.parse_with_raw() {
        first.push(frame);
    }

    let mut whole = RespParser::new();
    whole.extend(data);
    let mut second = Vec::new();
    while let Ok(Some((frame, _))) = whole.parse_with_raw() {
        second.push(frame);
    }
    assert_eq!(first, second);
});
