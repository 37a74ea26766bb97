use tracing::debug;

/// Problem metadata the trim rules may anchor on.
#[derive(Debug, Default, Clone, Copy)]
pub struct SanitizeContext<'a> {
    /// Expected declaration for statically typed languages, when the
    /// dataset provides one.
    pub signature: Option<&'a str>,
}

/// Extract a runnable code fragment from one raw model answer.
///
/// The rules are a strictly ordered trim sequence per target language;
/// later rules operate on the text already truncated by earlier rules, so
/// the order must not be reshuffled. Never fails: when no rule matches the
/// text passes through unmodified.
pub fn sanitize(language: &str, raw: &str, ctx: SanitizeContext<'_>) -> String {
    let mut completion = raw.replace('\r', "");
    completion = match language {
        "Python" => sanitize_python(completion),
        "Java" => sanitize_java(completion),
        "Go" => anchor_and_cut(completion, ctx.signature, "func main()"),
        "C++" => anchor_and_cut(completion, ctx.signature, "int main()"),
        _ => completion,
    };
    // Any fence still present marks the end of code in every language.
    completion = cut_before(completion, "```");
    debug!(language, completion = %completion, "sanitized completion");
    completion
}

/// Drop everything before the first occurrence of `marker`.
fn anchor_at(text: String, marker: &str) -> String {
    match text.find(marker) {
        Some(pos) => text[pos..].trim().to_string(),
        None => text,
    }
}

/// Keep everything before the first occurrence of `marker`.
fn cut_before(text: String, marker: &str) -> String {
    match text.find(marker) {
        Some(pos) => text[..pos].trim().to_string(),
        None => text,
    }
}

fn sanitize_python(mut completion: String) -> String {
    if completion.contains("```python") {
        completion = anchor_at(completion, "```python").replace("```python", "");
    }
    for marker in [
        "if __name__ == \"__main__\":",
        "# Example usage",
        "###",
        "</s>",
    ] {
        completion = cut_before(completion, marker);
    }
    completion
}

fn sanitize_java(mut completion: String) -> String {
    if completion.contains("class Solution {") {
        completion = anchor_at(completion, "class Solution {");
        for marker in ["```", "###", "</s>"] {
            completion = cut_before(completion, marker);
        }
    } else if completion.contains("public") {
        completion = anchor_at(completion, "public");
        for marker in ["```", "###", "</s>"] {
            completion = cut_before(completion, marker);
        }
        // Truncation stripped the class wrapper the checker expects;
        // re-synthesize it around the retained body.
        completion = format!("class Solution {{\n    {completion}\n}}\n");
    }
    completion
}

/// Statically typed formats anchor on the expected declaration from the
/// problem metadata and stop at the language's entry-point construct.
fn anchor_and_cut(mut completion: String, signature: Option<&str>, entry_point: &str) -> String {
    if let Some(signature) = signature {
        completion = anchor_at(completion, signature);
    }
    cut_before(completion, entry_point)
}
