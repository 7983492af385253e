/// Runtime globals that code analysis must not treat as user symbols when
/// classifying identifiers (extract-function parameter detection, usage
/// scans). Not consulted by the replace path.
pub const GLOBAL_IDENTIFIERS: &[&str] = &[
    "console",
    "window",
    "document",
    "process",
    "global",
    "globalThis",
    "Math",
    "JSON",
    "Array",
    "Object",
    "String",
    "Number",
    "Boolean",
    "Promise",
    "Symbol",
    "Map",
    "Set",
    "WeakMap",
    "WeakSet",
    "Date",
    "RegExp",
    "Error",
    "TypeError",
    "RangeError",
    "SyntaxError",
    "parseInt",
    "parseFloat",
    "isNaN",
    "isFinite",
    "encodeURIComponent",
    "decodeURIComponent",
    "encodeURI",
    "decodeURI",
    "setTimeout",
    "clearTimeout",
    "setInterval",
    "clearInterval",
    "setImmediate",
    "queueMicrotask",
    "structuredClone",
    "fetch",
    "require",
    "module",
    "exports",
    "Buffer",
    "URL",
    "URLSearchParams",
    "TextEncoder",
    "TextDecoder",
    "Intl",
    "Reflect",
    "Proxy",
    "BigInt",
    "Infinity",
    "NaN",
    "undefined",
];

pub fn is_global_identifier(name: &str) -> bool {
    GLOBAL_IDENTIFIERS.contains(&name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_globals_are_flagged() {
        assert!(is_global_identifier("console"));
        assert!(is_global_identifier("JSON"));
        assert!(is_global_identifier("setTimeout"));
        assert!(!is_global_identifier("myHelper"));
        assert!(!is_global_identifier("total"));
    }

    #[test]
    fn denylist_is_about_fifty_entries() {
        assert!(GLOBAL_IDENTIFIERS.len() >= 45 && GLOBAL_IDENTIFIERS.len() <= 60);
    }
}
