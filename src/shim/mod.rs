use crate::mode::{Mode, Toolchain};

/// File name of the runtime shim on disk.
pub const SHIM_FILE_NAME: &str = "wasm_exec.js";

/// Identifiers only the standard Go runtime shim references.
pub const GO_SIGNATURES: &[&str] = &[
    "runtime.scheduleTimeoutEvent",
    "runtime.clearTimeoutEvent",
    "runtime.wasmExit",
];

/// Identifiers only the TinyGo runtime shim references.
pub const TINYGO_SIGNATURES: &[&str] = &[
    "runtime.sleepTicks",
    "runtime.ticks",
    "$runtime.alloc",
    "tinygo_js",
];

const GO_WASM_EXEC: &str = include_str!("assets/wasm_exec_go.js");
const TINYGO_WASM_EXEC: &str = include_str!("assets/wasm_exec_tinygo.js");

/// Raw embedded shim for a toolchain.
pub fn embedded(toolchain: Toolchain) -> &'static str {
    match toolchain {
        Toolchain::Go => GO_WASM_EXEC,
        Toolchain::TinyGo => TINYGO_WASM_EXEC,
    }
}

pub fn default_header(shortcut: &str) -> String {
    format!("// wasmode: mode={shortcut}\n")
}

/// Bootstrap that fetches and runs the compiled module.
pub fn default_footer(wasm_file: &str) -> String {
    format!(
        r#"
const go = new Go();
WebAssembly.instantiateStreaming(fetch("{wasm_file}"), go.importObject).then((result) => {{
	go.run(result.instance);
}});
"#
    )
}

/// Converts CRLF and lone CR to LF and strips trailing spaces and tabs from
/// every line.
pub fn normalize(text: &str) -> String {
    let unified = text.replace("\r\n", "\n").replace('\r', "\n");
    unified
        .split('\n')
        .map(|line| line.trim_end_matches([' ', '\t']))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Parts used to assemble a shim.
#[derive(Debug, Clone, Copy)]
pub struct ShimRequest<'a> {
    pub mode: Mode,
    pub shortcut: &'a str,
    pub wasm_file: &'a str,
    pub header: Option<&'a str>,
    pub footer: Option<&'a str>,
}

/// Header + embedded body + footer, normalized.
pub fn compose(request: &ShimRequest<'_>) -> String {
    let header = request
        .header
        .map(str::to_string)
        .unwrap_or_else(|| default_header(request.shortcut));
    let wasm_file = if request.wasm_file.is_empty() {
        "client.wasm"
    } else {
        request.wasm_file
    };
    let footer = request
        .footer
        .map(str::to_string)
        .unwrap_or_else(|| default_footer(wasm_file));

    let body = embedded(request.mode.toolchain());
    let mut text = String::with_capacity(header.len() + body.len() + footer.len());
    text.push_str(&header);
    text.push_str(body);
    text.push_str(&footer);
    normalize(&text)
}

/// Signature hits found in a shim text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SignatureCount {
    pub go: usize,
    pub tinygo: usize,
}

impl SignatureCount {
    pub fn scan(text: &str) -> Self {
        let hits = |sigs: &[&str]| sigs.iter().filter(|s| text.contains(**s)).count();
        Self {
            go: hits(GO_SIGNATURES),
            tinygo: hits(TINYGO_SIGNATURES),
        }
    }

    /// Toolchain with strictly more hits, `None` on a tie.
    pub fn winner(&self) -> Option<Toolchain> {
        use std::cmp::Ordering;
        match self.go.cmp(&self.tinygo) {
            Ordering::Greater => Some(Toolchain::Go),
            Ordering::Less => Some(Toolchain::TinyGo),
            Ordering::Equal => None,
        }
    }
}

/// Last generated shim per mode.
#[derive(Debug, Default, Clone)]
pub struct ShimCache {
    slots: [String; 3],
}

impl ShimCache {
    pub fn get(&self, mode: Mode) -> Option<&str> {
        let slot = &self.slots[mode.index()];
        (!slot.is_empty()).then_some(slot.as_str())
    }

    pub fn store(&mut self, mode: Mode, text: String) {
        self.slots[mode.index()] = text;
    }

    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            slot.clear();
        }
    }
}
