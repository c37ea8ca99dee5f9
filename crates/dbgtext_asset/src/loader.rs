use std::{
    collections::HashMap,
    fs::File,
    io::Read,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, Context};

#[derive(Clone, Debug)]
pub struct Asset {
    pub bytes: Vec<u8>,
}

impl Asset {
    pub fn as_str(&self) -> anyhow::Result<&str> {
        std::str::from_utf8(&self.bytes).map_err(|err| anyhow!("Asset is not valid utf-8: {err}"))
    }
}

/// Reads asset files from disk and keeps their bytes around, keyed by path.
/// Loading the same path twice hits the cache unless it was evicted first.
#[derive(Debug, Default)]
pub struct Loader {
    assets: HashMap<PathBuf, Asset>,
}

impl Loader {
    pub fn new() -> Self {
        Self {
            assets: HashMap::new(),
        }
    }

    pub fn get<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<&Asset> {
        self.assets
            .get(path.as_ref())
            .ok_or(anyhow!("Path {:?} doesn't exist in asset map.", path.as_ref()))
    }

    pub fn load<P: AsRef<Path>>(&mut self, path: P) -> anyhow::Result<&Asset> {
        let path = path.as_ref();
        if !self.assets.contains_key(path) {
            let mut file =
                File::open(path).with_context(|| format!("Couldn't open asset at {:?}", path))?;
            let mut bytes = Vec::new();
            file.read_to_end(&mut bytes)?;
            log::debug!("loaded asset {:?} ({} bytes)", path, bytes.len());
            self.assets.insert(path.to_path_buf(), Asset { bytes });
        }
        self.get(path)
    }

    pub fn evict<P: AsRef<Path>>(&mut self, path: P) -> Option<Asset> {
        self.assets.remove(path.as_ref())
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn scratch_file(name: &str, contents: &[u8]) -> PathBuf {
        let file_name = format!("dbgtext_asset_{}_{name}", std::process::id());
        let path = std::env::temp_dir().join(file_name);
        let mut file = File::create(&path).unwrap();
        file.write_all(contents).unwrap();
        path
    }

    #[test]
    fn load_caches_bytes() {
        let path = scratch_file("cache.txt", b"hello");
        let mut loader = Loader::new();
        assert_eq!(loader.load(&path).unwrap().bytes, b"hello");

        // the cached copy survives the file going away
        std::fs::remove_file(&path).unwrap();
        assert_eq!(loader.load(&path).unwrap().as_str().unwrap(), "hello");
        assert_eq!(loader.len(), 1);

        assert!(loader.evict(&path).is_some());
        assert!(loader.load(&path).is_err());
    }

    #[test]
    fn missing_asset_is_an_error() {
        let loader = Loader::new();
        assert!(loader.get("does/not/exist.png").is_err());
    }
}
