//! Prompt templates for the three stages.

/// Substring a reviewer reply must contain to approve the code. Case-sensitive.
pub const APPROVAL_MARKER: &str = "Looks great";

pub fn architect(spec: &str) -> String {
    format!(
        "Build an app for this specification: <spec>{spec}</spec>. \
         Make a plan for the directory structure you'll need, then return each file in full. \
         Put every file in its own fenced code block and write the file's relative path \
         right after the opening fence, for example ```src/app.py. \
         Don't supply any reasoning, just code."
    )
}

pub fn reviewer(spec: &str, code: &str) -> String {
    format!(
        "Review this code: <code>{code}</code>. \
         Check if the code quality and whether it correctly implements this specification: <spec>{spec}</spec>. \
         If you're satisfied, just return '{APPROVAL_MARKER}', nothing else. \
         If not, return a review with a list of changes you'd like to see."
    )
}

pub fn coder(spec: &str, code: &str, review: &str) -> String {
    format!(
        "We need to improve code that should implement this specification: <spec>{spec}</spec>. \
         Here is the current code: <code>{code}</code>. \
         And here is a review of the code: <review>{review}</review>. \
         Improve the code based on the review, keep the specification in mind, and return the full updated code, \
         keeping the same fenced-block-per-file layout. \
         Don't supply any reasoning, just code."
    )
}

/// Whether a reviewer reply approves the code.
pub fn is_approval(review: &str) -> bool {
    review.contains(APPROVAL_MARKER)
}
