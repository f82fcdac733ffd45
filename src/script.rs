//! Compiled script data model.
//!
//! A [`BcScript`] is immutable after compilation apart from three cells:
//! the bytecode blob (the `get_n` fast-path rewrite patches it in place,
//! under the VM lock), and the two localized-text caches, which resolve
//! lazily on first use.

use crate::heap::Gc;
use crate::value::{OxStr, Value};

use bitflags::bitflags;
use std::sync::Mutex;
use std::collections::HashMap;

bitflags! {
    /// Attributes of a declaration.
    pub struct DeclFlags: u8 {
        /// `const`: single assignment, not resettable from nested frames.
        const CONST = 0x01;
        /// Imported reference; behaves like `CONST` for writes.
        const REF = 0x02;
        /// `$close` is invoked on scope exit and on re-assignment.
        const AUTO_CLOSE = 0x04;
    }
}

bitflags! {
    /// Attributes of a function descriptor.
    pub struct ScriptFuncFlags: u8 {
        /// The function binds a `this` receiver.
        const THIS = 0x01;
    }
}

impl Default for ScriptFuncFlags {
    fn default() -> Self {
        ScriptFuncFlags::empty()
    }
}

/// A named local declaration of a function.
#[derive(Debug, Clone)]
pub struct ScriptDecl {
    /// Declared name.
    pub name: OxStr,
    /// Attributes.
    pub flags: DeclFlags,
    /// Slot id inside the frame, assigned in declaration order.
    pub id: u16,
}

/// One line-table entry: the first instruction offset of a source line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ScriptLoc {
    /// Source line number.
    pub line: u32,
    /// Bytecode offset, relative to the function start.
    pub ip: u16,
}

/// Per-function descriptor.
#[derive(Debug, Default)]
pub struct ScriptFunc {
    /// Offset of the function's bytecode in the script blob.
    pub bc_start: usize,
    /// Length of the function's bytecode.
    pub bc_len: usize,
    /// Number of lexically enclosing frames captured on function creation.
    pub frame_num: u8,
    /// High-water mark of physical registers; at most 256.
    pub reg_num: u16,
    /// Attribute flags.
    pub flags: ScriptFuncFlags,
    /// Declarations in declaration order.
    pub decls: Vec<ScriptDecl>,
    /// Name to slot mapping over `decls`.
    pub decl_map: HashMap<OxStr, u16>,
    /// First entry of this function in the script's location table.
    pub loc_start: usize,
    /// Entry count of this function in the location table.
    pub loc_len: usize,
}

impl ScriptFunc {
    /// Slot id of a declared name.
    pub fn decl(&self, name: &str) -> Option<u16> {
        self.decl_map.get(name).copied()
    }

    /// Source line of a bytecode offset, from the location table.
    pub fn lookup_line(&self, loc_tab: &[ScriptLoc], ip: usize) -> u32 {
        let tab = &loc_tab[self.loc_start..self.loc_start + self.loc_len];
        match tab.binary_search_by(|e| (e.ip as usize).cmp(&ip)) {
            Ok(i) => tab[i].line,
            Err(0) => tab.first().map(|e| e.line).unwrap_or(0),
            Err(i) => tab[i - 1].line,
        }
    }
}

/// One `reference` entry: a referenced file and the names imported from it.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ScriptRef {
    /// Referenced file name.
    pub filename: OxStr,
    /// Imported items.
    pub items: Vec<ScriptRefItem>,
}

/// One imported name of a reference entry.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ScriptRefItem {
    /// Original name in the referenced script; `*` imports everything.
    pub orig: OxStr,
    /// Local alias, if given.
    pub name: Option<OxStr>,
    /// Whether the import is re-exported.
    pub public: bool,
}

/// A compiled script.
#[derive(Debug)]
pub struct BcScript {
    /// Process-unique serial; private property names embed it.
    pub serial: u64,
    /// Input name, used by diagnostics.
    pub name: OxStr,
    /// The bytecode blob. A cell so the `get_n` rewrite can patch it.
    pub bc: Mutex<Vec<u8>>,
    /// User constants.
    pub cvs: Vec<Value>,
    /// Private property names in decorated `#name@s<serial>` form.
    pub pps: Vec<Value>,
    /// Raw local text strings.
    pub ts: Vec<Value>,
    /// Localized counterparts of `ts`, resolved lazily.
    pub lts: Mutex<Vec<Value>>,
    /// Raw template-string templates.
    pub tts: Vec<Value>,
    /// Localized counterparts of `tts`, resolved lazily.
    pub ltts: Mutex<Vec<Value>>,
    /// Function descriptors; index 0 is the script's top level.
    pub sfuncs: Vec<ScriptFunc>,
    /// Reference/import table.
    pub refs: Vec<ScriptRef>,
    /// Optional localization text domain.
    pub text_domain: Option<OxStr>,
    /// Root frame holding the top-level declarations.
    pub frame: Gc,
    /// Location table, shared by all functions.
    pub loc_tab: Vec<ScriptLoc>,
    /// Exported names mapped to root-frame declaration slots.
    pub publics: Mutex<HashMap<OxStr, u16>>,
}

impl BcScript {
    /// Export a top-level declaration under `name`.
    pub fn add_public(&self, name: OxStr, decl_id: u16) {
        self.publics.lock().expect("publics lock").insert(name, decl_id);
    }

    /// Root-frame slot of an exported name.
    pub fn public(&self, name: &str) -> Option<u16> {
        self.publics.lock().expect("publics lock").get(name).copied()
    }

    /// Total bytecode length across all functions.
    pub fn bc_len(&self) -> usize {
        self.bc.lock().expect("bytecode lock").len()
    }

    /// Heap references held by the script: the root frame, template
    /// constants and the lazily-built localized template cache.
    pub(crate) fn trace(&self, out: &mut Vec<Gc>) {
        out.push(self.frame);
        for v in &self.cvs {
            v.trace(out);
        }
        for v in self.ltts.lock().expect("template lock").iter() {
            v.trace(out);
        }
    }
}
