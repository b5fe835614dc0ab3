#![cfg(feature = "deflate")]

use std::io::{Cursor, Read, Seek, SeekFrom};
use std::thread;

use moxillan::{
    build_package,
    error::{Error, FileNotFoundError, Result},
    source::{Directory, MemoryFile},
    AccessStrategy, BuildOptions, Package, PackageFile,
};
use pretty_assertions::assert_eq;
use tracing_test::traced_test;

fn contents(seed: usize, len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| ((i * 31 + seed * 17) % 253) as u8 ^ (i / 97) as u8)
        .collect()
}

fn open_package(root: &Directory, options: BuildOptions) -> Result<Package<Cursor<Vec<u8>>>> {
    let bytes = build_package(root, Cursor::new(Vec::new()), options)?;
    Package::new(Cursor::new(bytes.into_inner()))
}

fn nested_package() -> Result<Package<Cursor<Vec<u8>>>> {
    let root = Directory::new("")
        .with(
            Directory::new("a").with(
                Directory::new("b")
                    .with(MemoryFile::new("c", "leaf"))
                    .with(Directory::new("c")),
            ),
        )
        .with(MemoryFile::new("file.txt", "top"));
    open_package(&root, BuildOptions::default())
}

fn read_to_vec<R: Read + Seek>(file: &mut PackageFile<R>) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    file.read_to_end(&mut buffer)?;
    Ok(buffer)
}

#[test]
fn resolve_paths() -> Result<()> {
    let package = nested_package()?;

    for path in ["a/b/c", "a\\b\\c", "/a//b/c", "a/b\\c/"] {
        let node = package.find_file(path).expect("leaf should resolve");
        assert_eq!(node.name(), "c");
        assert!(!node.is_directory());
    }

    // A file and a directory may share a name, the requested kind decides
    let directory = package.find_directory("a/b/c").expect("directory should resolve");
    assert!(directory.is_directory());

    assert_eq!(package.find_directory(""), Some(package.root()));
    assert_eq!(package.find_directory("/"), Some(package.root()));
    assert!(package.find_file("").is_none());

    assert!(package.find_file("a/b").is_none());
    assert!(package.find_directory("file.txt").is_none());
    assert!(package.find_file("file.txt/anything").is_none());
    assert!(package.find_file("a/missing/c").is_none());

    Ok(())
}

#[test]
fn list_directory_entries() -> Result<()> {
    let package = nested_package()?;

    let root = package.list_directory(package.root());
    assert_eq!(
        root.iter().map(|e| e.name.as_str()).collect::<Vec<_>>(),
        vec!["a", "file.txt"]
    );
    assert!(root[0].is_directory);
    assert_eq!(root[0].size, 1);
    assert!(!root[1].is_directory);
    assert!(root[1].is_compressed);
    assert_eq!(root[1].size, 3);

    let file = package.find_file("file.txt").expect("file should exist");
    assert!(package.list_directory(file).is_empty());
    assert_eq!(package.node_info(file), root[1]);

    let paths = package.walk().map(|(path, _)| path).collect::<Vec<_>>();
    assert_eq!(paths, vec!["a", "a/b", "a/b/c", "a/b/c", "file.txt"]);

    Ok(())
}

#[test]
fn open_errors() -> Result<()> {
    let package = nested_package()?;

    let err = package
        .open_path("a/b", AccessStrategy::Sequential)
        .unwrap_err();
    assert!(matches!(
        err,
        Error::FileNotFound(FileNotFoundError::Path(ref path)) if path == "a/b"
    ));

    let directory = package.find_directory("a").expect("directory should exist");
    let err = package
        .open_file(directory, AccessStrategy::Random)
        .unwrap_err();
    assert!(matches!(
        err,
        Error::FileNotFound(FileNotFoundError::Directory(_))
    ));

    Ok(())
}

#[test]
fn strategies_agree() -> Result<()> {
    let data = contents(1, 150_000);
    let root = Directory::new("").with(MemoryFile::new("big.bin", data.clone()));

    for level in [0, 1, 9] {
        let mut package = open_package(&root, BuildOptions::builder().level(level).build())?;
        package.set_io_buffer_capacity(0);

        let mut sequential = package.open_path("big.bin", AccessStrategy::Sequential)?;
        let mut random = package.open_path("big.bin", AccessStrategy::Random)?;
        assert_eq!(sequential.size(), data.len() as u64);
        assert_eq!(random.size(), data.len() as u64);

        let mut left = vec![0u8; 4_321];
        let mut right = vec![0u8; 4_321];
        loop {
            let a = sequential.read(&mut left)?;
            let b = random.read(&mut right)?;
            assert_eq!(a, b);
            assert!(left[..a] == right[..b]);
            if a == 0 {
                break;
            }
        }
        assert!(sequential.is_eof());
        assert!(random.is_eof());
    }

    Ok(())
}

#[test]
fn sequential_stream_restarts() -> Result<()> {
    let data = contents(2, 40_000);
    let root = Directory::new("").with(MemoryFile::new("music.ogg", data.clone()));
    let package = open_package(&root, BuildOptions::default())?;

    let mut file = package.open_path("music.ogg", AccessStrategy::Sequential)?;
    assert!(!file.is_seekable());

    let mut head = vec![0u8; 10_000];
    file.read_exact(&mut head)?;
    assert_eq!(file.pos(), 10_000);
    assert_eq!(file.stream_position()?, 10_000);

    let err = file.seek(SeekFrom::Current(5)).unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::Unsupported);
    assert!(matches!(
        file.set_pos(20_000),
        Err(Error::FeatureUnsupported(_))
    ));

    file.rewind()?;
    assert_eq!(file.pos(), 0);
    assert_eq!(read_to_vec(&mut file)?, data);

    file.set_pos(0)?;
    assert_eq!(read_to_vec(&mut file)?, data);

    Ok(())
}

#[test]
fn random_stream_seeks_anywhere() -> Result<()> {
    let data = contents(3, 40_000);
    let root = Directory::new("").with(MemoryFile::new("texture.dds", data.clone()));
    let package = open_package(&root, BuildOptions::default())?;

    let mut file = package.open_path("texture.dds", AccessStrategy::Random)?;
    assert!(file.is_seekable());

    file.seek(SeekFrom::End(-100))?;
    assert_eq!(read_to_vec(&mut file)?, &data[data.len() - 100..]);

    file.set_pos(12_345)?;
    let mut chunk = vec![0u8; 10];
    file.read_exact(&mut chunk)?;
    assert_eq!(chunk, &data[12_345..12_355]);

    Ok(())
}

#[test]
fn stored_stream_seeks_anywhere() -> Result<()> {
    let data = contents(4, 5_000);
    let root = Directory::new("").with(MemoryFile::new("raw.bin", data.clone()));
    let package = open_package(&root, BuildOptions::builder().level(0).build())?;

    for strategy in [AccessStrategy::Sequential, AccessStrategy::Random] {
        let mut file = package.open_path("raw.bin", strategy)?;
        assert!(file.is_seekable());

        file.set_pos(4_990)?;
        assert_eq!(read_to_vec(&mut file)?, &data[4_990..]);

        file.set_pos(10_000)?;
        assert!(file.is_eof());
        assert_eq!(read_to_vec(&mut file)?, Vec::<u8>::new());
    }

    Ok(())
}

#[test]
fn empty_files_read_nothing() -> Result<()> {
    let root = Directory::new("")
        .with(MemoryFile::new("stored", Vec::<u8>::new()).with_compression(0))
        .with(MemoryFile::new("deflated", Vec::<u8>::new()).with_compression(9));
    let package = open_package(&root, BuildOptions::default())?;

    for path in ["stored", "deflated"] {
        for strategy in [AccessStrategy::Sequential, AccessStrategy::Random] {
            let mut file = package.open_path(path, strategy)?;
            assert!(file.is_eof());
            assert!(read_to_vec(&mut file)?.is_empty());
        }
    }

    Ok(())
}

#[traced_test]
#[test]
fn handles_read_concurrently() -> Result<()> {
    let files = (0..8)
        .map(|i| (format!("chunk{i}.bin"), contents(i, 60_000 + i * 1_000)))
        .collect::<Vec<_>>();

    let mut root = Directory::new("");
    for (name, data) in &files {
        let level = if name.ends_with("0.bin") { 0 } else { 6 };
        root.add(MemoryFile::new(name.clone(), data.clone()).with_compression(level));
    }
    let package = open_package(&root, BuildOptions::default())?;

    thread::scope(|scope| {
        let handles = files
            .iter()
            .enumerate()
            .map(|(i, (name, data))| {
                let package = &package;
                scope.spawn(move || -> Result<()> {
                    let strategy = if i % 2 == 0 {
                        AccessStrategy::Sequential
                    } else {
                        AccessStrategy::Random
                    };

                    for _ in 0..4 {
                        let mut file = package.open_path(name, strategy)?;
                        let mut actual = Vec::new();
                        let mut chunk = [0u8; 777];
                        loop {
                            let read = file.read(&mut chunk)?;
                            if read == 0 {
                                break;
                            }
                            actual.extend_from_slice(&chunk[..read]);
                        }
                        assert!(actual == *data, "{name} was corrupted");
                    }
                    Ok(())
                })
            })
            .collect::<Vec<_>>();

        for handle in handles {
            handle.join().expect("reader thread panicked")?;
        }
        Ok::<_, Error>(())
    })?;

    Ok(())
}

#[test]
fn handle_count_tracks_open_files() -> Result<()> {
    let package = nested_package()?;
    assert_eq!(package.handle_count(), 1);

    let first = package.open_path("file.txt", AccessStrategy::Sequential)?;
    let second = package.open_path("a/b/c", AccessStrategy::Sequential)?;
    assert_eq!(package.handle_count(), 3);

    drop(first);
    drop(second);
    assert_eq!(package.handle_count(), 1);

    Ok(())
}

#[test]
fn handles_outlive_package() -> Result<()> {
    let root = Directory::new("").with(MemoryFile::new("keep.txt", "still here"));
    let package = open_package(&root, BuildOptions::default())?;

    let mut file = package.open_path("keep.txt", AccessStrategy::Sequential)?;
    drop(package);

    assert_eq!(read_to_vec(&mut file)?, b"still here");

    Ok(())
}

#[test]
fn info_reports_layout() -> Result<()> {
    let root = Directory::new("")
        .with(MemoryFile::new("a", contents(5, 1_000)))
        .with(Directory::new("d").with(MemoryFile::new("b", contents(6, 234))));
    let package = open_package(&root, BuildOptions::builder().table_level(6).build())?;

    let info = package.info();
    assert_eq!(info.version, 0x0111);
    assert_eq!(info.header_length, 20);
    assert_eq!(info.data_length, 1_234);
    assert!(info.file_table_compressed);
    assert!(info.file_table_length > 2);

    Ok(())
}
