//! WGSL shader sources for the wgpu backend.
//!
//! Samples are stored one per `u32` word; WGSL storage buffers have no 8-bit
//! element type.

/// Horizontal flip.
pub const FLIP_H: &str = r#"
@group(0) @binding(0) var<storage, read> src: array<u32>;
@group(0) @binding(1) var<storage, read_write> dst: array<u32>;
@group(0) @binding(2) var<uniform> dims: vec4<u32>;  // w, h, 0, 0

@compute @workgroup_size(16, 16)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {
    let x = id.x;
    let y = id.y;
    let w = dims.x;
    if x >= w || y >= dims.y { return; }

    dst[y * w + x] = src[y * w + (w - 1u - x)];
}
"#;

/// Clipped box blur. Out-of-range samples are excluded from sum and count.
pub const BOX_BLUR: &str = r#"
@group(0) @binding(0) var<storage, read> src: array<u32>;
@group(0) @binding(1) var<storage, read_write> dst: array<u32>;
@group(0) @binding(2) var<uniform> dims: vec4<u32>;  // cols, rows, radius, 0

@compute @workgroup_size(16, 16)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {
    let col = id.x;
    let row = id.y;
    let cols = dims.x;
    let rows = dims.y;
    if col >= cols || row >= rows { return; }

    let r = min(dims.z, max(rows, cols));
    let r0 = select(0u, row - r, row >= r);
    let r1 = min(row + r, rows - 1u);
    let c0 = select(0u, col - r, col >= r);
    let c1 = min(col + r, cols - 1u);

    var sum = 0u;
    for (var cr = r0; cr <= r1; cr = cr + 1u) {
        for (var cc = c0; cc <= c1; cc = cc + 1u) {
            sum = sum + src[cr * cols + cc];
        }
    }
    let count = (r1 - r0 + 1u) * (c1 - c0 + 1u);
    dst[row * cols + col] = sum / count;
}
"#;
