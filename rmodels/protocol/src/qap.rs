//! QAP1 constants as defined by the Rserve protocol.

/// Evaluate a string and return the result.
pub const CMD_EVAL: i32 = 0x003;
/// Terminate the server process.
pub const CMD_SHUTDOWN: i32 = 0x004;
/// Bind a value to a symbol in the global environment.
pub const CMD_SET_SEXP: i32 = 0x020;

/// Response flag.
pub const CMD_RESP: i32 = 0x10000;
/// Successful response.
pub const RESP_OK: i32 = CMD_RESP | 0x0001;
/// Failed response; error code in bits 24..31.
pub const RESP_ERR: i32 = CMD_RESP | 0x0002;
/// Out-of-band message flag.
pub const CMD_OOB: i32 = 0x20000;

/// Parameter: NUL-terminated string.
pub const DT_STRING: u8 = 4;
/// Parameter: encoded expression.
pub const DT_SEXP: u8 = 10;
/// Parameter flag: 56-bit length follows.
pub const DT_LARGE: u8 = 64;

/// Expression: `NULL`.
pub const XT_NULL: u8 = 0;
/// Expression: scalar integer (legacy).
pub const XT_INT: u8 = 1;
/// Expression: scalar double (legacy).
pub const XT_DOUBLE: u8 = 2;
/// Expression: scalar string (legacy).
pub const XT_STR: u8 = 3;
/// Expression: language object (legacy).
pub const XT_LANG: u8 = 4;
/// Expression: symbol wrapping a name.
pub const XT_SYM: u8 = 5;
/// Expression: scalar logical (legacy).
pub const XT_BOOL: u8 = 6;
/// Expression: S4 object.
pub const XT_S4: u8 = 7;
/// Expression: generic vector.
pub const XT_VECTOR: u8 = 16;
/// Expression: closure.
pub const XT_CLOS: u8 = 18;
/// Expression: symbol name.
pub const XT_SYMNAME: u8 = 19;
/// Expression: untagged pairlist.
pub const XT_LIST_NOTAG: u8 = 20;
/// Expression: tagged pairlist.
pub const XT_LIST_TAG: u8 = 21;
/// Expression: untagged language construct.
pub const XT_LANG_NOTAG: u8 = 22;
/// Expression: tagged language construct.
pub const XT_LANG_TAG: u8 = 23;
/// Expression: expression vector.
pub const XT_VECTOR_EXP: u8 = 26;
/// Expression: integer vector.
pub const XT_ARRAY_INT: u8 = 32;
/// Expression: double vector.
pub const XT_ARRAY_DOUBLE: u8 = 33;
/// Expression: character vector.
pub const XT_ARRAY_STR: u8 = 34;
/// Expression: logical vector.
pub const XT_ARRAY_BOOL: u8 = 36;
/// Expression: raw vector.
pub const XT_RAW: u8 = 37;
/// Expression flag: 56-bit length follows.
pub const XT_LARGE: u8 = 64;
/// Expression flag: attribute pairlist precedes the payload.
pub const XT_HAS_ATTR: u8 = 128;

/// Integer `NA`.
pub const NA_INTEGER: i32 = i32::MIN;
/// Logical `NA` as transported in `XT_ARRAY_BOOL`.
pub const NA_LOGICAL: u8 = 2;

/// Human readable name for a server error code.
#[must_use]
pub const fn error_name(code: u8) -> &'static str {
    match code {
        0x41 => "authentication failed",
        0x42 => "connection broken",
        0x43 => "invalid command",
        0x44 => "invalid parameter",
        0x45 => "engine error",
        0x46 => "io error",
        0x47 => "not open",
        0x48 => "access denied",
        0x49 => "unsupported command",
        0x4a => "unknown command",
        0x4b => "data overflow",
        0x4c => "object too big",
        0x4d => "out of memory",
        0x4e => "control pipe closed",
        0x50 => "session busy",
        0x51 => "detach failed",
        _ => "unknown error",
    }
}
