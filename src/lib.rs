//! OCR + LLM field extraction service.
//!
//! Each `POST /ocr` request gets its own disposable Tesseract context, the
//! recognized text is handed to an OpenAI-compatible model with a
//! dynamically-generated field contract, and the model's reply is normalized
//! so the caller always gets back exactly the fields it asked for.

pub mod error;
pub mod extract;
pub mod fields;
pub mod llm_client;
pub mod ocr;
pub mod pipeline;
pub mod prelude;
pub mod prompt;
pub mod server;
