#![no_main]

use libfuzzer_sys::fuzz_target;
use userscript_manager::version::{compare_versions, is_newer};

fuzz_target!(|data: (&str, &str)| {
    let (a, b) = data;
    if let (Some(ab), Some(ba)) = (compare_versions(a, b), compare_versions(b, a)) {
        assert_eq!(ab, ba.reverse());
    }
    assert!(!is_newer(a, a));
});
