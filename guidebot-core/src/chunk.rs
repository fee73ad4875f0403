//! Line-based text chunking for ingest.

/// Split `text` into chunks of roughly `chunk_size` characters.
///
/// Each line is trimmed, then lines are accumulated until adding the next one
/// (plus its newline) would reach `chunk_size`, at which point the buffer is
/// flushed. Blank lines ahead of any content are dropped; chunks are trimmed
/// and whitespace-only buffers are discarded. A single line longer than
/// `chunk_size` becomes its own chunk rather than being split mid-line, so
/// SOP step numbers stay attached to their text.
pub fn chunk_text(text: &str, chunk_size: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_chars = 0usize;

    let mut flush = |buffer: &mut String, chars: &mut usize| {
        let trimmed = buffer.trim();
        if !trimmed.is_empty() {
            chunks.push(trimmed.to_string());
        }
        buffer.clear();
        *chars = 0;
    };

    for line in text.split('\n') {
        let line = line.trim();
        if line.is_empty() && current.trim().is_empty() {
            continue;
        }
        let line_chars = line.chars().count();
        if current_chars + line_chars + 1 >= chunk_size {
            flush(&mut current, &mut current_chars);
        }
        current.push_str(line);
        current.push('\n');
        current_chars += line_chars + 1;
    }
    flush(&mut current, &mut current_chars);

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_empty_text_yields_no_chunks() {
        assert!(chunk_text("", 500).is_empty());
        assert!(chunk_text("   \n\n  \t\n", 500).is_empty());
    }

    #[test]
    fn test_short_text_is_one_chunk() {
        let chunks = chunk_text("Step 1: Verify room pressure.\nStep 2: Sign the log.", 500);
        assert_eq!(
            chunks,
            vec!["Step 1: Verify room pressure.\nStep 2: Sign the log."]
        );
    }

    #[test]
    fn test_lines_split_at_chunk_boundary() {
        let line = "x".repeat(40);
        let text = format!("{line}\n{line}\n{line}");
        let chunks = chunk_text(&text, 90);
        // Two 40-char lines fit in a 90-char budget, the third starts a new chunk.
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], format!("{line}\n{line}"));
        assert_eq!(chunks[1], line);
    }

    #[test]
    fn test_overlong_line_is_its_own_chunk() {
        let long = "y".repeat(1200);
        let text = format!("intro\n{long}\noutro");
        let chunks = chunk_text(&text, 500);
        assert_eq!(chunks, vec!["intro".to_string(), long, "outro".to_string()]);
    }

    #[test]
    fn test_each_line_is_stored_stripped() {
        let chunks = chunk_text("    Step 1: Gown up.\n\tStep 2: Sanitize hands.  ", 500);
        assert_eq!(chunks, vec!["Step 1: Gown up.\nStep 2: Sanitize hands."]);
    }

    #[test]
    fn test_indentation_does_not_count_against_the_budget() {
        // Two 40-char lines padded to 60; stripped they still share a chunk.
        let line = format!("          {}          ", "x".repeat(40));
        let text = format!("{line}\n{line}");
        let chunks = chunk_text(&text, 90);
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn test_chunks_are_trimmed() {
        let text = format!("  padded  \n\n{}\n", "z".repeat(600));
        let chunks = chunk_text(&text, 500);
        assert_eq!(chunks[0], "padded");
        assert!(!chunks[1].starts_with(' '));
    }

    #[test]
    fn test_blank_runs_do_not_produce_chunks() {
        let filler = "a".repeat(498);
        let text = format!("{filler}\n\n\n\n{filler}");
        let chunks = chunk_text(&text, 500);
        assert_eq!(chunks.len(), 2);
    }
}
