//! Prompt templates for the summarization model.

/// Cut `text` to at most `max_chars` characters, on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

/// Prompt asking for a short explanation of one source file.
pub fn file_summary_prompt(path: &str, code: &str) -> String {
    format!(
        "You are a senior software engineer helping a new team member get familiar \
with a codebase. Explain the purpose of the file `{path}`.

Source:
```
{code}
```

Summarize what this file does and how it fits into the project in at most 100 words."
    )
}

/// Prompt asking for a bullet-point summary of a unified diff.
pub fn commit_summary_prompt(diff: &str) -> String {
    format!(
        "You are an experienced engineer writing short summaries of commits.

You will receive the raw unified diff of one commit. Describe in plain English \
what changed and, where it is evident, why. Do not describe how the code looks.

How to read the diff:
- `diff --git a/<path> b/<path>` and the `---`/`+++` lines name the file being changed.
- Lines starting with `+` were added.
- Lines starting with `-` were removed.
- Other lines are unchanged context and are not part of the change.

Answer with a few short bullet points, for example:
- Increased the page size of the search endpoint from `10` to `50`
- Fixed a typo in the release workflow name
- Moved HTTP client setup into its own module

Most commits need fewer bullets than this. Mention file names only when it helps. \
Do not repeat these examples.

Diff:
```diff
{diff}
```"
    )
}
