#![no_main]
use arbitrary::Arbitrary;
use core_socks::{Reply, Request, TargetAddr};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct Input {
    data: Vec<u8>,
    host: String,
    port: u16,
}

fuzz_target!(|inp: Input| {
    // Arbitrary bytes must decode to Ok or a defined error, never panic.
    if let Ok((req, used)) = Request::decode(&inp.data) {
        assert!(used <= inp.data.len());
        // Re-encoding a decoded request reproduces its wire bytes, domain
        // names included, except RSV which is always written as zero.
        let w = req.encode().expect("decoded request always encodes");
        assert_eq!(&w[..2], &inp.data[..2]);
        assert_eq!(&w[3..], &inp.data[3..used]);
    }
    if let Ok((_, used)) = Reply::decode(&inp.data) {
        assert!(used <= inp.data.len());
    }

    // Encoding caller-supplied hosts either succeeds or reports the length.
    let req = Request::connect(TargetAddr::from_host(&inp.host), inp.port);
    if let Ok(w) = req.encode() {
        let (back, used) = Request::decode(&w).expect("own encoding decodes");
        assert_eq!(used, w.len());
        assert_eq!(back.port, inp.port);
    }
});
