pub mod buffer;
pub mod dsp;
pub mod error;
pub mod patch;
pub mod rng;

use crate::dsp::analysis;
use crate::dsp::{DspContext, NoopFx};
use crate::error::CoreError;
use crate::patch::Patch;
use wasm_bindgen::prelude::*;

/// The crate version, read from Cargo.toml at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// WASM-exposed: return the phaselab-core version string.
#[wasm_bindgen]
pub fn core_version() -> String {
    VERSION.to_string()
}

/// Parse a patch from its JSON form.
pub fn parse_patch(json: &str) -> Result<Patch, CoreError> {
    Ok(Patch::from_json(json)?)
}

fn js_err(e: impl std::fmt::Display) -> JsValue {
    JsValue::from_str(&format!("{e}"))
}

/// WASM-exposed: synthesize a mono patch and return interleaved f32 samples
/// for AudioWorklet playback.
#[wasm_bindgen]
pub fn synthesize_patch(patch_json: &str, sample_rate: u32) -> Result<Vec<f32>, JsValue> {
    let patch = parse_patch(patch_json).map_err(js_err)?;
    let mut ctx = DspContext::new();
    let buffer = analysis::synthesize(
        &mut ctx,
        &patch,
        None,
        sample_rate,
        0.0,
        0.0,
        &mut NoopFx,
        None,
    );
    Ok(buffer.interleaved())
}

/// WASM-exposed: synthesize a stereo pair of patches into interleaved samples.
#[wasm_bindgen]
pub fn synthesize_stereo(
    left_json: &str,
    right_json: &str,
    sample_rate: u32,
) -> Result<Vec<f32>, JsValue> {
    let left = parse_patch(left_json).map_err(js_err)?;
    let right = parse_patch(right_json).map_err(js_err)?;
    let mut ctx = DspContext::new();
    let buffer = analysis::synthesize(
        &mut ctx,
        &left,
        Some(&right),
        sample_rate,
        0.0,
        0.0,
        &mut NoopFx,
        None,
    );
    Ok(buffer.interleaved())
}

/// WASM-exposed: single-cycle waveform plus leakage-free spectrum for the
/// editor's oscilloscope and spectrum panes.
#[wasm_bindgen]
pub fn patch_preview(patch_json: &str, size: usize) -> Result<JsValue, JsValue> {
    let patch = parse_patch(patch_json).map_err(js_err)?;
    let mut ctx = DspContext::new();
    let preview = analysis::get_preview(&mut ctx, &patch, size)
        .ok_or_else(|| js_err(error::FftError::UnsupportedSize { size }))?;
    serde_wasm_bindgen::to_value(&preview).map_err(js_err)
}

/// WASM-exposed: whole-cycle-snapped spectrum at the real sample rate.
#[wasm_bindgen]
pub fn detailed_fft(
    patch_json: &str,
    sample_rate: u32,
    size: usize,
) -> Result<JsValue, JsValue> {
    let patch = parse_patch(patch_json).map_err(js_err)?;
    let mut ctx = DspContext::new();
    let spectrum = analysis::get_detailed_fft(&mut ctx, &patch, sample_rate, size)
        .ok_or_else(|| js_err(error::FftError::UnsupportedSize { size }))?;
    serde_wasm_bindgen::to_value(&spectrum).map_err(js_err)
}

/// WASM-exposed: THD in percent at one test frequency.
#[wasm_bindgen]
pub fn thd_percent(
    patch_json: &str,
    sample_rate: f64,
    frequency: f64,
) -> Result<f64, JsValue> {
    let patch = parse_patch(patch_json).map_err(js_err)?;
    let mut ctx = DspContext::new();
    Ok(analysis::get_thd_percent(
        &mut ctx,
        &patch,
        sample_rate,
        frequency,
        &mut NoopFx,
    ))
}

/// WASM-exposed: swept THD curve as `{ frequency, thd_percent }` points.
#[wasm_bindgen]
pub fn thd_graph(
    patch_json: &str,
    sample_rate: f64,
    start_freq: f64,
    points: usize,
) -> Result<JsValue, JsValue> {
    let patch = parse_patch(patch_json).map_err(js_err)?;
    let mut ctx = DspContext::new();
    let graph = analysis::get_thd_graph(
        &mut ctx,
        &patch,
        sample_rate,
        start_freq,
        points,
        &mut NoopFx,
    );
    serde_wasm_bindgen::to_value(&graph).map_err(js_err)
}

/// WASM-exposed: human-readable description of the oversampling setup,
/// including the designed kernel tap count.
#[wasm_bindgen]
pub fn oversampling_info(patch_json: &str) -> Result<String, JsValue> {
    let patch = parse_patch(patch_json).map_err(js_err)?;
    let mut ctx = DspContext::new();
    Ok(dsp::nonlinear::oversampling_description(
        &patch,
        &mut ctx.kernels,
    ))
}

/// WASM-exposed: per-sample clock offsets the jitter stage would apply, for
/// the editor's jitter preview strip.
#[wasm_bindgen]
pub fn jitter_preview(
    patch_json: &str,
    sample_rate: f64,
    length: usize,
) -> Result<Vec<f64>, JsValue> {
    let patch = parse_patch(patch_json).map_err(js_err)?;
    Ok(dsp::jitter::preview_offsets(&patch, sample_rate, length))
}
