//! Prompt Templates
//!
//! Prompt construction for each pipeline stage. The text here is opaque to
//! the core pipeline; the pipeline fixes only when these are invoked and
//! where their outputs are stored.

use std::path::Path;

/// Per-file analysis prompt
pub fn file_analysis(portable_path: &str, content: &str) -> String {
    format!(
        r#"Analyze this source file and produce a concise markdown knowledge summary.

Cover:
- Purpose and responsibilities of the file
- Key definitions (types, functions, classes, constants) and what they do
- Notable dependencies and how the file interacts with the rest of the project
- Anything surprising a maintainer should know

File: {portable_path}
Content:
```
{content}
```

Respond with markdown only, no preamble."#
    )
}

/// Chunk analysis over one slice of an oversized directory input
pub fn chunk_analysis(portable_dir: &str, chunk_index: usize, chunk_count: usize, chunk: &str) -> String {
    format!(
        r#"You are summarizing directory {portable_dir} in parts. This is part {part} of {chunk_count}.

Summarize the following member analyses, preserving concrete names and responsibilities:

{chunk}

Respond with markdown only."#,
        part = chunk_index + 1,
    )
}

/// Aggregation across the chunk summaries of one directory
pub fn chunk_aggregate(portable_dir: &str, chunk_summaries: &str) -> String {
    format!(
        r#"The directory {portable_dir} was summarized in parts. Merge the partial
summaries below into one coherent description of the directory, removing
duplication but keeping every distinct responsibility:

{chunk_summaries}

Respond with markdown only."#
    )
}

/// Directory synthesis over combined file analyses and child summaries
pub fn directory_analysis(portable_dir: &str, combined_input: &str) -> String {
    format!(
        r#"Write a knowledge summary for the directory {portable_dir}.

Below are the analyses of its files and the summaries of its subdirectories.
Synthesize them into a description of what this directory contains, how its
pieces fit together, and what role it plays in the project:

{combined_input}

Respond with markdown only, no preamble."#
    )
}

/// Project-root global summary
pub fn global_summary(portable_root: &str, root_analysis: &str, file_count: usize, dir_count: usize) -> String {
    format!(
        r#"Write the top-level summary for the project rooted at {portable_root}
({file_count} files across {dir_count} directories).

Using the root directory analysis below, describe the project as a whole:
its purpose, its major components, and how they relate.

{root_analysis}

Respond with markdown only, no preamble."#
    )
}

/// Standardized analysis for zero-byte files; no LLM call is made and the
/// result is cached like any other analysis.
pub fn empty_file_analysis(file_path: &Path, portable_path: &str) -> String {
    let extension = file_path
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_else(|| "none".to_string());
    format!(
        "**Empty file.** `{portable_path}` contains no content (0 bytes, extension: {extension}). \
         It may be a placeholder, a marker file, or reserved for future use."
    )
}
