//! WGSL sources of the kernel programs.
//!
//! Every program is compiled from the same prelude (bindings, uniform
//! accessors, bounds-checked sampling) plus a `kernel(x, y)` body that
//! returns the value of one target texel. Activation and cost variants get
//! their functions generated into the module, so each
//! [`Program`] maps to exactly one pipeline.
//!
//! # Bindings (group 0)
//!
//! - Binding 0: `KernelUniforms` (uniform)
//! - Bindings 1-4: inputs 0-3 (storage, read) as `array<vec4<f32>>`
//! - Binding 5: target (storage, read_write) as `array<vec4<f32>>`
//!
//! # Workgroup Size
//!
//! [8, 8, 1]: one invocation per target texel.

use crate::activation::Activation;
use crate::cost::{CostFunction, CROSS_ENTROPY_EPSILON};
use crate::kernel::Program;

/// Workgroup side, in texels.
pub const WORKGROUP_SIDE: u32 = 8;

const PRELUDE: &str = r#"
struct KernelUniforms {
    floats: array<vec4<f32>, 2>,
    ints: array<vec4<i32>, 2>,
    inputs: array<vec4<i32>, 4>,
    target_desc: vec4<i32>,
}

@group(0) @binding(0) var<uniform> u: KernelUniforms;
@group(0) @binding(1) var<storage, read> in0: array<vec4<f32>>;
@group(0) @binding(2) var<storage, read> in1: array<vec4<f32>>;
@group(0) @binding(3) var<storage, read> in2: array<vec4<f32>>;
@group(0) @binding(4) var<storage, read> in3: array<vec4<f32>>;
@group(0) @binding(5) var<storage, read_write> dst: array<vec4<f32>>;

fn fu(slot: u32) -> f32 {
    return u.floats[slot / 4u][slot % 4u];
}

fn ni(slot: u32) -> i32 {
    return u.ints[slot / 4u][slot % 4u];
}

// Reads outside the bound buffer return zero.
fn tex(slot: i32, x: i32, y: i32) -> vec4<f32> {
    let d = u.inputs[slot];
    if (d.z == 1) {
        return vec4<f32>(0.0);
    }
    if (d.z == 2) {
        return vec4<f32>(1.0);
    }
    if (x < 0 || y < 0 || x >= d.x || y >= d.y) {
        return vec4<f32>(0.0);
    }
    let idx = y * d.x + x;
    var v = vec4<f32>(0.0);
    switch slot {
        case 0: { v = in0[idx]; }
        case 1: { v = in1[idx]; }
        case 2: { v = in2[idx]; }
        default: { v = in3[idx]; }
    }
    return v;
}

fn owner(rel: i32, stride: i32, count: i32) -> i32 {
    if (rel < 0 || rel % stride != 0 || rel / stride >= count) {
        return -1;
    }
    return rel / stride;
}
"#;

const MAIN: &str = r#"
@compute @workgroup_size(8, 8, 1)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let x = i32(gid.x);
    let y = i32(gid.y);
    if (x >= u.target_desc.x || y >= u.target_desc.y) {
        return;
    }
    var v = kernel(x, y);
    if (u.target_desc.z == 1) {
        v = round(clamp(v, vec4<f32>(0.0), vec4<f32>(1.0)) * 255.0) / 255.0;
    }
    dst[y * u.target_desc.x + x] = v;
}
"#;

/// Full WGSL module of a program.
pub fn source(program: Program) -> String {
    let mut wgsl = String::from(PRELUDE);
    match program {
        Program::Activate(act) | Program::ActivationDerivative(act) => {
            wgsl.push_str(&activation_functions(act));
        }
        Program::OutputDelta(act, cost) => {
            wgsl.push_str(&activation_functions(act));
            wgsl.push_str(&cost_function(act, cost));
        }
        _ => {}
    }
    wgsl.push_str("\nfn kernel(x: i32, y: i32) -> vec4<f32> {\n");
    wgsl.push_str(body(program));
    wgsl.push_str("}\n");
    wgsl.push_str(MAIN);
    wgsl
}

fn activation_functions(act: Activation) -> String {
    let (apply, derivative) = match act {
        Activation::Linear => ("return z;", "return 1.0;"),
        Activation::Relu => ("return max(z, 0.0);", "return select(0.0, 1.0, z > 0.0);"),
        Activation::Elu => (
            "if (z > 0.0) { return z; }\n    return exp(z) - 1.0;",
            "if (z > 0.0) { return 1.0; }\n    return exp(z);",
        ),
        Activation::Sigmoid => (
            "return 1.0 / (1.0 + exp(-z));",
            "let s = 1.0 / (1.0 + exp(-z));\n    return s * (1.0 - s);",
        ),
        Activation::Tanh => ("return tanh(z);", "let t = tanh(z);\n    return 1.0 - t * t;"),
        Activation::Softplus => (
            "if (z > 20.0) { return z; }\n    return log(1.0 + exp(z));",
            "return 1.0 / (1.0 + exp(-z));",
        ),
    };
    format!(
        r#"
fn act(z: f32) -> f32 {{
    {apply}
}}

fn act_d(z: f32) -> f32 {{
    {derivative}
}}

fn act4(z: vec4<f32>) -> vec4<f32> {{
    return vec4<f32>(act(z.x), act(z.y), act(z.z), act(z.w));
}}

fn act_d4(z: vec4<f32>) -> vec4<f32> {{
    return vec4<f32>(act_d(z.x), act_d(z.y), act_d(z.z), act_d(z.w));
}}
"#
    )
}

fn cost_function(act: Activation, cost: CostFunction) -> String {
    let body = match cost {
        CostFunction::Quadratic => "return (o - e) * s * act_d(z);".to_string(),
        CostFunction::CrossEntropy => {
            let shortcut = if act == Activation::Sigmoid {
                "if (s == 1.0) { return o - e; }\n    "
            } else {
                ""
            };
            format!(
                "{shortcut}let denom = max(o * (1.0 - o), {eps:e});\n    return (o - e) / denom * s * act_d(z);",
                eps = CROSS_ENTROPY_EPSILON
            )
        }
    };
    format!(
        r#"
fn cost_delta(o: f32, e: f32, z: f32, s: f32) -> f32 {{
    {body}
}}
"#
    )
}

fn body(program: Program) -> &'static str {
    match program {
        Program::Fill => "    return vec4<f32>(fu(0u), fu(1u), fu(2u), fu(3u));\n",
        Program::Copy => "    return tex(0, x, y);\n",
        Program::Downsample => {
            r#"    let sx = 2 * x;
    let sy = 2 * y;
    return (tex(0, sx, sy) + tex(0, sx + 1, sy) + tex(0, sx, sy + 1) + tex(0, sx + 1, sy + 1)) * 0.25;
"#
        }
        Program::Residual => "    return tex(0, x, y) - tex(1, x, y);\n",
        Program::OneHot => {
            "    return select(vec4<f32>(0.0), vec4<f32>(1.0), y * u.target_desc.x + x == ni(0u));\n"
        }
        Program::ForwardDirect => "    return tex(1, x, y) * tex(0, x, y) + tex(2, x, y);\n",
        Program::FullProducts => {
            r#"    let fs = ni(0u);
    return tex(1, x, y) * tex(0, x % fs, y % fs);
"#
        }
        Program::MipSum => "    return tex(0, x, y) * fu(0u) + tex(1, x, y);\n",
        Program::ForwardFullNPoT => {
            r#"    let fs = ni(0u);
    var acc = tex(2, x, y);
    for (var v = 0; v < fs; v++) {
        for (var w = 0; w < fs; w++) {
            acc += tex(1, x * fs + w, y * fs + v) * tex(0, w, v);
        }
    }
    return acc;
"#
        }
        Program::ForwardSquare => {
            r#"    let k = ni(0u);
    var acc = tex(2, x, y);
    for (var j = 0; j < k; j++) {
        for (var i = 0; i < k; i++) {
            let wx = x * k + i;
            let wy = y * k + j;
            let src = tex(3, wx, wy);
            acc += tex(1, wx, wy) * tex(0, i32(src.x), i32(src.y)) * src.z;
        }
    }
    return acc;
"#
        }
        Program::ForwardSquareFast => {
            r#"    let k = ni(0u);
    let s = ni(1u);
    let off = ni(2u);
    var acc = tex(2, x, y);
    for (var j = 0; j < k; j++) {
        for (var i = 0; i < k; i++) {
            acc += tex(1, x * k + i, y * k + j) * tex(0, x * s + off + i, y * s + off + j);
        }
    }
    return acc;
"#
        }
        Program::ForwardConv => {
            r#"    let k = ni(0u);
    let kk = ni(1u);
    let s = ni(2u);
    let off = ni(3u);
    let a = x % kk;
    let b = y % kk;
    let px = x / kk;
    let py = y / kk;
    var acc = tex(2, x, y);
    for (var j = 0; j < k; j++) {
        for (var i = 0; i < k; i++) {
            acc += tex(1, a * k + i, b * k + j) * tex(0, px * s + off + i, py * s + off + j);
        }
    }
    return acc;
"#
        }
        Program::Reorganize => {
            r#"    let kk = ni(0u);
    let m = ni(1u);
    return tex(0, (x % m) * kk + x / m, (y % m) * kk + y / m);
"#
        }
        Program::Unreorganize => {
            r#"    let kk = ni(0u);
    let m = ni(1u);
    return tex(0, (x % kk) * m + x / kk, (y % kk) * m + y / kk);
"#
        }
        Program::Activate(_) => {
            r#"    let a = act4(tex(0, x, y)) * fu(0u);
    let lo = vec4<f32>(fu(1u));
    let hi = vec4<f32>(fu(2u));
    var v = a;
    switch ni(0u) {
        case 1: { v = clamp(a, lo, hi); }
        case 2: { v = select(a, clamp(a, lo, hi), tex(1, x, y) > vec4<f32>(0.5)); }
        default: {}
    }
    return v;
"#
        }
        Program::MaxPool => {
            r#"    let p = ni(0u);
    var acc = tex(0, x * p, y * p);
    for (var j = 0; j < p; j++) {
        for (var i = 0; i < p; i++) {
            acc = max(acc, tex(0, x * p + i, y * p + j));
        }
    }
    return acc;
"#
        }
        Program::MaxPoolMask => {
            r#"    let p = ni(0u);
    let bx = x / p * p;
    let by = y / p * p;
    var best = tex(0, bx, by);
    for (var j = 0; j < p; j++) {
        for (var i = 0; i < p; i++) {
            best = max(best, tex(0, bx + i, by + j));
        }
    }
    var first = vec4<i32>(-1);
    for (var j = 0; j < p; j++) {
        for (var i = 0; i < p; i++) {
            let v = tex(0, bx + i, by + j);
            for (var c = 0; c < 4; c++) {
                if (first[c] < 0 && v[c] == best[c]) {
                    first[c] = j * p + i;
                }
            }
        }
    }
    let own = (y - by) * p + (x - bx);
    return select(vec4<f32>(0.0), vec4<f32>(1.0), first == vec4<i32>(own));
"#
        }
        Program::MaxPoolBackward => {
            r#"    let p = ni(0u);
    return tex(0, x / p, y / p) * tex(1, x, y);
"#
        }
        Program::OutputDelta(..) => {
            r#"    let o = tex(0, x, y);
    let e = tex(1, x, y);
    let z = tex(2, x, y);
    let s = fu(0u);
    let d = vec4<f32>(
        cost_delta(o.x, e.x, z.x, s),
        cost_delta(o.y, e.y, z.y, s),
        cost_delta(o.z, e.z, z.z, s),
        cost_delta(o.w, e.w, z.w, s),
    );
    return d * tex(3, x, y);
"#
        }
        Program::ActivationDerivative(_) => "    return tex(0, x, y) * act_d4(tex(1, x, y));\n",
        Program::BackwardDirect | Program::GradDirect => "    return tex(1, x, y) * tex(0, x, y);\n",
        Program::FullBackProducts => {
            r#"    let fs = ni(0u);
    let ts = ni(1u);
    let xo = x % ts;
    let yo = y % ts;
    return tex(1, xo * fs + x / ts, yo * fs + y / ts) * tex(0, xo, yo);
"#
        }
        Program::BackwardFull => {
            r#"    let fs = ni(0u);
    let ts = ni(1u);
    var acc = vec4<f32>(0.0);
    for (var yo = 0; yo < ts; yo++) {
        for (var xo = 0; xo < ts; xo++) {
            acc += tex(1, xo * fs + x, yo * fs + y) * tex(0, xo, yo);
        }
    }
    return acc;
"#
        }
        Program::BackwardSquare => {
            r#"    let m = ni(0u);
    var acc = vec4<f32>(0.0);
    for (var b = 0; b < m; b++) {
        for (var a = 0; a < m; a++) {
            let to = tex(2, x * m + a, y * m + b);
            if (to.x >= 0.0) {
                acc += tex(1, i32(to.x), i32(to.y)) * tex(0, i32(to.z), i32(to.w));
            }
        }
    }
    return acc;
"#
        }
        Program::BackwardSquareFast => {
            r#"    let k = ni(0u);
    let s = ni(1u);
    let off = ni(2u);
    let ts = ni(3u);
    var acc = vec4<f32>(0.0);
    for (var j = 0; j < k; j++) {
        for (var i = 0; i < k; i++) {
            let ox = owner(x - off - i, s, ts);
            let oy = owner(y - off - j, s, ts);
            if (ox >= 0 && oy >= 0) {
                acc += tex(1, ox * k + i, oy * k + j) * tex(0, ox, oy);
            }
        }
    }
    return acc;
"#
        }
        Program::BackwardConv => {
            r#"    let k = ni(0u);
    let kk = ni(1u);
    let s = ni(2u);
    let off = ni(3u);
    let m = ni(4u);
    var acc = vec4<f32>(0.0);
    for (var b = 0; b < kk; b++) {
        for (var a = 0; a < kk; a++) {
            for (var j = 0; j < k; j++) {
                for (var i = 0; i < k; i++) {
                    let px = owner(x - off - i, s, m);
                    let py = owner(y - off - j, s, m);
                    if (px >= 0 && py >= 0) {
                        acc += tex(1, a * k + i, b * k + j) * tex(0, px * kk + a, py * kk + b);
                    }
                }
            }
        }
    }
    return acc;
"#
        }
        Program::GradFull => {
            r#"    let fs = ni(0u);
    return tex(1, x / fs, y / fs) * tex(0, x % fs, y % fs);
"#
        }
        Program::GradSquare => {
            r#"    let k = ni(0u);
    let src = tex(2, x, y);
    return tex(1, x / k, y / k) * tex(0, i32(src.x), i32(src.y)) * src.z;
"#
        }
        Program::GradSquareFast => {
            r#"    let k = ni(0u);
    let s = ni(1u);
    let off = ni(2u);
    let ox = x / k;
    let oy = y / k;
    return tex(1, ox, oy) * tex(0, ox * s + off + x % k, oy * s + off + y % k);
"#
        }
        Program::GradConv => {
            r#"    let k = ni(0u);
    let kk = ni(1u);
    let s = ni(2u);
    let off = ni(3u);
    let m = ni(4u);
    let a = x / k;
    let i = x % k;
    let b = y / k;
    let j = y % k;
    var acc = vec4<f32>(0.0);
    for (var py = 0; py < m; py++) {
        for (var px = 0; px < m; px++) {
            acc += tex(1, px * kk + a, py * kk + b) * tex(0, px * s + off + i, py * s + off + j);
        }
    }
    return acc;
"#
        }
        Program::MomentumBlend => "    return tex(0, x, y) + tex(1, x, y) * fu(0u);\n",
        Program::SgdUpdate => "    return tex(0, x, y) * (1.0 - fu(1u)) - tex(1, x, y) * fu(0u);\n",
    }
}
