use std::fs;
use std::io::Write;
use tempfile::TempDir;

use docrag_core::chunker::Chunker;
use docrag_core::loader::TextFileLoader;
use docrag_core::traits::DocumentLoader;
use docrag_core::Error;

#[test]
fn load_and_chunk_single_small_file() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path();
    let file_path = dir.join("a.txt");
    let mut f = fs::File::create(&file_path).unwrap();
    writeln!(f, "Short text").unwrap();

    let docs = TextFileLoader::new().load(dir).expect("load");
    let chunker = Chunker::with_char_estimate(512, 128).unwrap();
    let (chunks, stats) = chunker.chunk_documents(&docs, "a.txt");

    assert_eq!(chunks.len(), 1, "one small paragraph becomes one chunk");
    assert_eq!(chunks[0].content, "Short text");
    assert_eq!(stats.total_chunks, 1);
}

#[test]
fn directory_walk_is_sorted_and_filtered() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path();
    fs::create_dir(dir.join("nested")).unwrap();
    fs::write(dir.join("b.txt"), "charlie delta").unwrap();
    fs::write(dir.join("a.md"), "# alpha\n\nbravo").unwrap();
    fs::write(dir.join("nested").join("c.txt"), "echo foxtrot").unwrap();
    fs::write(dir.join("skip.pdf"), "binary").unwrap();

    let docs = TextFileLoader::new().load(dir).expect("load dir");
    let sources: Vec<String> = docs.iter().filter_map(|d| d.metadata.source.clone()).collect();
    assert_eq!(docs.len(), 3);
    assert!(sources[0].ends_with("a.md"));
    assert!(sources[1].ends_with("b.txt"));
    assert!(sources[2].ends_with("c.txt"));
}

#[test]
fn empty_directory_is_empty_content() {
    let tmp = TempDir::new().unwrap();
    let err = TextFileLoader::new().load(tmp.path()).unwrap_err();
    assert!(matches!(err, Error::EmptyContent(_)));
    assert!(err.is_input_error());
}

#[test]
fn chunks_from_multi_page_file_keep_pages() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("pages.txt");
    let page = "Sentence about cells. ".repeat(30);
    fs::write(&path, format!("{page}\u{000C}{page}")).unwrap();

    let docs = TextFileLoader::new().load(&path).unwrap();
    let chunker = Chunker::with_char_estimate(50, 10).unwrap();
    let (chunks, stats) = chunker.chunk_documents(&docs, "pages.txt");

    assert!(chunks.len() > 2);
    assert_eq!(stats.source_pages, 2);
    assert!(chunks.iter().any(|c| c.metadata.page == 1));
    assert!(chunks.iter().all(|c| c.metadata.total_chunks == chunks.len()));
}
