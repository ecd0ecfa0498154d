use std::io;
use std::path::{Path, PathBuf};

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

const COPY_BUFFER: usize = 1024 * 1024;

/// `<dir>/<file>.partNNN`, numbered from 1.
pub fn part_path(original: &Path, index: usize) -> PathBuf {
    let name = original
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "download".to_string());
    original.with_file_name(format!("{}.part{:03}", name, index))
}

/// Splits `path` into sequential parts of `part_size` bytes (the last one may
/// be shorter). The original file is left in place.
pub async fn split_file(path: &Path, part_size: u64) -> io::Result<Vec<PathBuf>> {
    if part_size == 0 {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "part size must be positive"));
    }

    let mut input = File::open(path).await?;
    let total = input.metadata().await?.len();
    let count = total.div_ceil(part_size).max(1) as usize;

    let mut parts = Vec::with_capacity(count);
    let mut buf = vec![0u8; COPY_BUFFER];

    for index in 1..=count {
        let part = part_path(path, index);
        let mut output = File::create(&part).await?;
        let mut remaining = part_size;

        while remaining > 0 {
            let want = remaining.min(buf.len() as u64) as usize;
            let n = input.read(&mut buf[..want]).await?;
            if n == 0 {
                break;
            }
            output.write_all(&buf[..n]).await?;
            remaining -= n as u64;
        }

        output.flush().await?;
        parts.push(part);
    }

    Ok(parts)
}
