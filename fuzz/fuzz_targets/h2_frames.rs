#![no_main]
use libfuzzer_sys::fuzz_target;

use async_std::io::Cursor;
use hreq_transport::h2::frame::read_frame;

fuzz_target!(|data: &[u8]| {
    let mut cursor = Cursor::new(data.to_vec());

    async_std::task::block_on(async move {
        // decode frames until the input runs out or is rejected.
        while let Ok(Some(frame)) = read_frame(&mut cursor, 16_384).await {
            let mut buf = vec![];
            frame.encode(&mut buf);
        }
    });
});
