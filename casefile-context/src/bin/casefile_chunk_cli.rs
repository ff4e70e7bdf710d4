use casefile_context::text::{DEFAULT_MAX_WORDS, DEFAULT_OVERLAP, TextChunk, WordWindowChunker};
use clap::Parser;
use serde::Serialize;
use std::fs;
use std::io::{self, Read};

/// A CLI tool to split a document into word-window chunks as JSON.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the input text file. If not provided, reads from stdin.
    #[arg(short, long)]
    input: Option<String>,

    /// Source file name recorded with each chunk.
    #[arg(short, long, default_value = "stdin")]
    source: String,

    /// Maximum number of words per chunk.
    #[arg(short, long, default_value_t = DEFAULT_MAX_WORDS)]
    max_words: usize,

    /// Words shared by consecutive windows of a long paragraph.
    #[arg(short, long, default_value_t = DEFAULT_OVERLAP)]
    overlap: usize,
}

fn main() -> io::Result<()> {
    let args = Args::parse();

    if args.max_words == 0 || args.overlap >= args.max_words {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!(
                "overlap ({}) must be smaller than max-words ({}), and max-words must be positive",
                args.overlap, args.max_words
            ),
        ));
    }

    let file_content = if let Some(input_path) = args.input {
        fs::read_to_string(input_path)?
    } else {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        buffer
    };

    let chunker = WordWindowChunker::new(args.max_words, args.overlap);
    let chunks = chunker.chunk_segments(&file_content);

    #[derive(Serialize)]
    struct SerializableChunk<'a> {
        source: &'a str,
        #[serde(flatten)]
        chunk: &'a TextChunk,
        word_count: usize,
    }

    let serializable_chunks: Vec<SerializableChunk> = chunks
        .iter()
        .map(|c| SerializableChunk {
            source: &args.source,
            chunk: c,
            word_count: c.word_range.len(),
        })
        .collect();

    let json_output = serde_json::to_string_pretty(&serializable_chunks)?;
    println!("{}", json_output);

    Ok(())
}
