//! Strategy-specific prompt preambles handed to the assistant.

/// Prompt for incremental review of a pushed commit.
pub fn commit_prompt() -> String {
    "Review the code changes in this commit.\n\n\
     Focus on:\n\
     1. Logic errors and latent bugs\n\
     2. Security problems (injection, XSS, leaked secrets)\n\
     3. Code style and best practices\n\
     4. Performance problems\n\n\
     Output requirements:\n\
     - Markdown format\n\
     - Group findings by severity (🔴 critical / 🟡 warning / 🔵 suggestion)\n\
     - For each finding include the file, a description and a suggested fix\n\n\
     Important: do not emit any code edit blocks; produce a written review only."
        .to_string()
}

/// Prompt for cumulative review of a merge request against its target.
pub fn mr_prompt(target_branch: &str) -> String {
    format!(
        "This is a merge request targeting branch `{target_branch}`.\n\n\
         Review every change of the current branch relative to the target.\n\n\
         Review points:\n\
         1. Architectural impact of the change set\n\
         2. API compatibility and breaking changes\n\
         3. Code quality: readability, maintainability, test coverage\n\
         4. Security risks\n\
         5. Potential performance bottlenecks\n\n\
         Output requirements:\n\
         - Markdown format\n\
         - Start with an overall assessment summary\n\
         - List concrete findings grouped by file\n\
         - Give improvement suggestions\n\n\
         Important: do not emit any code edit blocks; produce a written review only."
    )
}
