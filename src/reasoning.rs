//! Reasoning-span removal for model output.
//!
//! Some models interleave chain-of-thought inside `<think>...</think>`
//! tags. Display and export both want the answer without the scratchpad,
//! so [`strip`] removes every such span. A plain scanner is enough here;
//! the tags never nest.

const OPEN_TAG: &str = "<think>";
const CLOSE_TAG: &str = "</think>";

/// Remove all `<think>...</think>` spans from `text`.
///
/// An opening tag with no matching close drops everything through the end
/// of the input. Text outside the tags is preserved byte for byte.
pub fn strip(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(open) = rest.find(OPEN_TAG) {
        out.push_str(&rest[..open]);
        let after_open = &rest[open + OPEN_TAG.len()..];
        match after_open.find(CLOSE_TAG) {
            Some(close) => rest = &after_open[close + CLOSE_TAG.len()..],
            // Unterminated span: the model was cut off mid-thought.
            None => return out,
        }
    }

    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::strip;

    #[test]
    fn passes_plain_text_through() {
        assert_eq!(strip("hello world"), "hello world");
        assert_eq!(strip(""), "");
    }

    #[test]
    fn removes_single_span() {
        assert_eq!(strip("<think>hmm</think>The answer is 4."), "The answer is 4.");
    }

    #[test]
    fn removes_multiple_spans() {
        assert_eq!(
            strip("a<think>x</think>b<think>y</think>c"),
            "abc"
        );
    }

    #[test]
    fn removes_multiline_span() {
        let input = "Sure.<think>\nstep 1\nstep 2\n</think>\nDone.";
        assert_eq!(strip(input), "Sure.\nDone.");
    }

    #[test]
    fn unterminated_span_drops_to_end() {
        assert_eq!(strip("Answer: <think>still going"), "Answer: ");
    }

    #[test]
    fn stray_close_tag_is_preserved() {
        assert_eq!(strip("no open</think> here"), "no open</think> here");
    }
}
