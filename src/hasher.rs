//! Streamed SHA-1 / SHA-256 digests of files and zip entries.

use std::fmt::LowerHex;
use std::fs;
use std::io::{self, Read};
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::digest::Output;
use sha2::{Digest, Sha256};

const BLOCK_SIZE: usize = 64 * 1024;

/// Digest used to identify file content. SHA-1 is the default: this is integrity checking, not an
/// adversarial setting, and it is the faster of the two.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    #[default]
    Sha1,
    Sha256,
}

impl HashAlgorithm {
    pub fn name(self) -> &'static str {
        match self {
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
        }
    }
}

pub fn hash_file(path: &Path, algorithm: HashAlgorithm) -> io::Result<String> {
    let mut file = fs::File::open(path)?;
    hash_reader(&mut file, algorithm)
}

/// Lowercase hex digest of everything `reader` yields, read in 64 KiB blocks.
pub fn hash_reader<R: Read + ?Sized>(
    reader: &mut R,
    algorithm: HashAlgorithm,
) -> io::Result<String> {
    match algorithm {
        HashAlgorithm::Sha1 => digest_stream::<Sha1, R>(reader),
        HashAlgorithm::Sha256 => digest_stream::<Sha256, R>(reader),
    }
}

fn digest_stream<D, R>(reader: &mut R) -> io::Result<String>
where
    D: Digest,
    Output<D>: LowerHex,
    R: Read + ?Sized,
{
    let mut hasher = D::new();
    let mut buffer = vec![0_u8; BLOCK_SIZE];

    loop {
        let read = match reader.read(&mut buffer) {
            Ok(read) => read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        };
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}
