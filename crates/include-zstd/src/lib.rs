//! Compile-time embedding of text assets, compressed with zstd.
//!
//! `include_zstd!("path/relative/to/manifest")` expands to a byte-string
//! literal holding the compressed file. Decode it with `zstd::decode_all`.

use proc_macro::TokenStream;
use proc_macro2::Span;
use quote::quote;
use std::env;
use std::fs;
use std::path::PathBuf;
use syn::{Error, LitByteStr, LitStr, parse_macro_input};

const COMPRESSION_LEVEL: i32 = 19;

fn compress_asset(relative: &str) -> Result<Vec<u8>, String> {
    let manifest_dir = env::var("CARGO_MANIFEST_DIR").map_err(|e| e.to_string())?;
    let full_path = PathBuf::from(manifest_dir).join(relative);
    let content = fs::read(&full_path)
        .map_err(|e| format!("cannot read {}: {e}", full_path.display()))?;
    if content.is_empty() {
        return Err(format!("{} is empty", full_path.display()));
    }
    zstd::stream::encode_all(&content[..], COMPRESSION_LEVEL).map_err(|e| e.to_string())
}

#[proc_macro]
pub fn include_zstd(input: TokenStream) -> TokenStream {
    let input_lit = parse_macro_input!(input as LitStr);
    match compress_asset(&input_lit.value()) {
        Ok(compressed) => {
            let literal_bytes = LitByteStr::new(&compressed, Span::call_site());
            quote!(#literal_bytes).into()
        }
        Err(msg) => Error::new(input_lit.span(), msg).to_compile_error().into(),
    }
}
