//! Streaming 64-bit content digest used for input fingerprints.
//!
//! The digest only has to detect change, not resist an adversary, so it uses
//! the stable SipHash wrapper that produces the same value across platforms
//! and releases. Modification times are deliberately not part of the digest;
//! they are unreliable across checkouts and container-image caching.

use std::fs::File;
use std::hash::Hasher;
use std::io::{self, Read};
use std::path::Path;

use anyhow::{Context, Result};
use rustc_stable_hash::StableSipHasher128 as StableHasher;

use crate::paths;

pub struct ContentDigest(StableHasher);

impl ContentDigest {
    pub fn new() -> ContentDigest {
        ContentDigest(StableHasher::new())
    }

    pub fn update(&mut self, bytes: &[u8]) -> &mut ContentDigest {
        self.0.write(bytes);
        self
    }

    pub fn update_file(&mut self, mut file: &File) -> io::Result<&mut ContentDigest> {
        let mut buf = [0; 64 * 1024];
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break Ok(self);
            }
            self.update(&buf[..n]);
        }
    }

    pub fn update_path<P: AsRef<Path>>(&mut self, path: P) -> Result<&mut ContentDigest> {
        let path = path.as_ref();
        let file = paths::open(path)?;
        self.update_file(&file)
            .with_context(|| format!("failed to read `{}`", path.display()))?;
        Ok(self)
    }

    pub fn finish(&mut self) -> u64 {
        Hasher::finish(&self.0)
    }
}

impl Default for ContentDigest {
    fn default() -> Self {
        Self::new()
    }
}
