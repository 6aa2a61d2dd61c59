use std::io;

use async_compression::tokio::write::GzipEncoder;
use tokio::io::AsyncWriteExt as _;

/// Compresses a payload with gzip.
///
/// # Errors
///
/// If the compressor fails, an error is returned.
pub async fn gzip(payload: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = GzipEncoder::new(Vec::with_capacity(payload.len() / 2));
    encoder.write_all(payload).await?;
    encoder.shutdown().await?;
    Ok(encoder.into_inner())
}

#[cfg(test)]
mod tests {
    use async_compression::tokio::bufread::GzipDecoder;
    use tokio::io::AsyncReadExt as _;

    use super::*;

    #[tokio::test]
    async fn gzip_round_trips() {
        let payload = br#"{"sequence":1,"samples":[]}"#.repeat(32);
        let compressed = gzip(&payload).await.unwrap();
        assert!(compressed.len() < payload.len());

        let mut decoder = GzipDecoder::new(&compressed[..]);
        let mut decompressed = Vec::new();
        decoder.read_to_end(&mut decompressed).await.unwrap();
        assert_eq!(decompressed, payload);
    }
}
