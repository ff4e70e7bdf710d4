use casefile_context::text::{WordWindowChunker, chunk_text};
use proptest::prelude::*;

fn paragraphs() -> impl Strategy<Value = Vec<Vec<String>>> {
    prop::collection::vec(prop::collection::vec("[a-z0-9]{1,8}", 1..60), 0..6)
}

fn render(paragraphs: &[Vec<String>], crlf: bool) -> String {
    let separator = if crlf { "\r\n  \r\n" } else { "\n\n" };
    paragraphs
        .iter()
        .map(|words| words.join(" "))
        .collect::<Vec<_>>()
        .join(separator)
}

fn params() -> impl Strategy<Value = (usize, usize)> {
    (1usize..25).prop_flat_map(|max_words| (Just(max_words), 0..max_words))
}

proptest! {
    #[test]
    fn chunking_is_deterministic(text in "[a-z \n\r\t]{0,400}", (max_words, overlap) in params()) {
        prop_assert_eq!(
            chunk_text(&text, max_words, overlap),
            chunk_text(&text, max_words, overlap)
        );
    }

    #[test]
    fn chunks_never_exceed_max_words(text in "[a-z \n\t]{0,400}", (max_words, overlap) in params()) {
        for chunk in chunk_text(&text, max_words, overlap) {
            let count = chunk.split_whitespace().count();
            prop_assert!(count >= 1);
            prop_assert!(count <= max_words, "{} words > {}", count, max_words);
            prop_assert_eq!(chunk.trim(), chunk.as_str());
        }
    }

    #[test]
    fn windows_reconstruct_each_paragraph(
        paragraphs in paragraphs(),
        (max_words, overlap) in params(),
        crlf in any::<bool>(),
    ) {
        let text = render(&paragraphs, crlf);
        let segments = WordWindowChunker::new(max_words, overlap).chunk_segments(&text);

        let mut rebuilt: Vec<Vec<String>> = vec![Vec::new(); paragraphs.len()];
        let mut covered_until = vec![0usize; paragraphs.len()];
        for segment in &segments {
            let words: Vec<&str> = segment.chunk_text.split_whitespace().collect();
            prop_assert_eq!(words.len(), segment.word_range.len());

            let already = covered_until[segment.paragraph].saturating_sub(segment.word_range.start);
            rebuilt[segment.paragraph].extend(words[already..].iter().map(|w| w.to_string()));
            covered_until[segment.paragraph] = segment.word_range.end;
        }

        prop_assert_eq!(rebuilt, paragraphs);
    }

    #[test]
    fn sequence_numbers_are_contiguous(paragraphs in paragraphs(), (max_words, overlap) in params()) {
        let text = render(&paragraphs, false);
        let segments = WordWindowChunker::new(max_words, overlap).chunk_segments(&text);
        for (expected, segment) in segments.iter().enumerate() {
            prop_assert_eq!(segment.sequence, expected);
        }
    }

    #[test]
    fn degenerate_overlap_terminates(words in 1usize..300, max_words in 1usize..20, extra in 0usize..20) {
        let text = (0..words).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ");
        let chunks = chunk_text(&text, max_words, max_words + extra);
        prop_assert_eq!(chunks.len(), 1);
    }
}

#[test]
fn thousand_words_ten_three() {
    let text = (0..1000)
        .map(|i| format!("w{i}"))
        .collect::<Vec<_>>()
        .join(" ");
    let chunks = chunk_text(&text, 10, 3);
    assert_eq!(chunks.len(), 143);
    assert!(chunks.iter().all(|c| c.split_whitespace().count() <= 10));
}
