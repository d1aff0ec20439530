//! Prompts for the LLM-backed content models.
//!
//! Every prompt asks for plain text with no preamble so replies can be used
//! with light cleanup only (see [`crate::pipeline::postprocess`]).

/// Vision captioning.
pub const CAPTION_PROMPT: &str = "\
You describe images for an archive catalogue. Reply with one sentence that \
describes what the image shows. Do not transcribe text that appears in the \
image and do not guess who any person is.";

/// Reply the OCR model gives when an image has no text.
pub const NO_TEXT_MARKER: &str = "NO_TEXT";

/// Vision OCR.
pub const OCR_PROMPT: &str = "\
Transcribe all readable text in this image exactly as written, preserving line \
breaks. Output only the transcribed text. If the image contains no readable \
text, reply with exactly NO_TEXT.";

/// Document summarisation.
pub const SUMMARY_PROMPT: &str = "\
Summarise the following document text in one or two sentences (20 to 60 \
words). Output only the summary.";

/// Grammar and style correction.
pub const POLISH_PROMPT: &str = "\
Correct the grammar, spelling and punctuation of the following text. Keep its \
meaning, keep any quoted text verbatim, and output only the corrected text.";

/// Person-name recognition.
pub const NER_PROMPT: &str = "\
List every personal name of a real or fictional person that appears in the \
following text. Copy each name exactly as it is written in the text. Reply \
with a JSON array of strings and nothing else; reply [] when there are none.";

/// Security analysis prompt for one file.
pub fn analysis_prompt(description: &str, snippet: &str) -> String {
    format!(
        "Analyze the following document for potential security insights.\n\n\
         Document Description: {description}\n\n\
         Document Content: {snippet}\n\n\
         First write one line starting with \"Description:\" that restates the \
         document description in one clear sentence. Then, based on the \
         description and content, list 3 to 4 key findings or security \
         implications as bullet points starting with \"- \"."
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn analysis_prompt_embeds_inputs() {
        let p = analysis_prompt("A slide deck", "[NAME_REMOVED] owns the VPN");
        assert!(p.contains("Document Description: A slide deck"));
        assert!(p.contains("Document Content: [NAME_REMOVED] owns the VPN"));
        assert!(p.contains("3 to 4 key findings"));
    }

    #[test]
    fn ocr_prompt_names_marker() {
        assert!(OCR_PROMPT.contains(NO_TEXT_MARKER));
    }
}
