use ruc_registry::ingestion::BulkLoader;
use ruc_registry::store::RegistryStore;
use ruc_registry::{RegistryConfig, RegistryError};
use std::io::{self, Read};
use tempfile::TempDir;

const GOOD: &str = "RUC|NOMBRE|ESTADO|CONDICION\n20123456789|ACME|ACTIVO|HABIDO\n";

/// Yields its data, then fails like a disk that went away
struct FailingReader {
    data: io::Cursor<Vec<u8>>,
}

impl Read for FailingReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.data.read(buf)?;
        if n == 0 {
            return Err(io::Error::new(io::ErrorKind::Other, "device unplugged"));
        }
        Ok(n)
    }
}

fn loader(chunk_size: usize) -> BulkLoader {
    let config = RegistryConfig {
        chunk_size,
        ..RegistryConfig::default()
    };
    BulkLoader::from_config(&config).unwrap()
}

fn dir_entries(temp_dir: &TempDir) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(temp_dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[test]
fn test_interrupted_load_keeps_previous_store() {
    let temp_dir = TempDir::new().unwrap();
    let dest = temp_dir.path().join("padron.db");
    loader(10).load_quiet(GOOD.as_bytes(), &dest).unwrap();

    let mut replacement = String::from("RUC|NOMBRE|ESTADO|CONDICION\n");
    for i in 0..50 {
        replacement.push_str(&format!("{}|EMPRESA {}|ACTIVO|HABIDO\n", 20500000000u64 + i, i));
    }
    let source = FailingReader {
        data: io::Cursor::new(replacement.into_bytes()),
    };
    let err = loader(7).load_quiet(source, &dest).unwrap_err();
    assert!(matches!(err, RegistryError::Build(_)));

    let store = RegistryStore::open(&dest, "padron", "ruc").unwrap();
    assert_eq!(store.row_count().unwrap(), 1);
    assert_eq!(store.fetch_batch(&[20123456789]).unwrap()[0].name, "ACME");
    assert_eq!(dir_entries(&temp_dir), vec!["padron.db"]);
}

#[test]
fn test_failed_first_build_leaves_nothing() {
    let temp_dir = TempDir::new().unwrap();
    let dest = temp_dir.path().join("padron.db");
    let duplicated = format!("{}20123456789|ACME OTRA|ACTIVO|HABIDO\n", GOOD);

    assert!(loader(10).load_quiet(duplicated.as_bytes(), &dest).is_err());
    assert!(dir_entries(&temp_dir).is_empty());
    assert!(matches!(
        RegistryStore::open(&dest, "padron", "ruc"),
        Err(RegistryError::Store(_))
    ));
}

#[test]
fn test_stale_staged_store_is_swept() {
    let temp_dir = TempDir::new().unwrap();
    let stale = temp_dir.path().join(".ruc-registry-crashed.db.partial");
    std::fs::write(&stale, b"half a database").unwrap();

    let dest = temp_dir.path().join("padron.db");
    loader(10).load_quiet(GOOD.as_bytes(), &dest).unwrap();
    assert_eq!(dir_entries(&temp_dir), vec!["padron.db"]);
}
