//! Prompt sent with every scan

/// Instructions for the vision model; the reply contract is what
/// [`super::parser::parse_reply`] expects
pub const CLASSIFICATION_PROMPT: &str = "\
You are analyzing a 12-week pregnancy ultrasound scan image.

Your task:
1. Decide whether this is a valid ultrasound scan image
2. Locate the genital tubercle (nub), a small protrusion between the baby's legs
3. Identify the baby's spine
4. Estimate the angle between the nub and the spine

Prediction rules:
- Nub angled more than 30 degrees upward from the spine: BOY
- Nub below 30 degrees or parallel to the spine: GIRL
- Nub not clearly visible: UNCLEAR
- Not an ultrasound image: INVALID

If you cannot confidently distinguish the nub from the umbilical cord, legs or
fingers, answer UNCLEAR.

Reply with exactly three lines:
Line 1: one word, BOY, GIRL, UNCLEAR or INVALID
Line 2: a confidence score from 0 to 100
Line 3: one or two sentences describing what you see

Example:
BOY
85
The nub is clearly visible and angled roughly 40 degrees upward from the spine.";
