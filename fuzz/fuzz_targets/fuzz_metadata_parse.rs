#![no_main]

use libfuzzer_sys::fuzz_target;
use userscript_manager::metadata;

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data) {
        let first = metadata::parse(text);
        let second = metadata::parse(text);
        assert_eq!(first, second);
        for (key, values) in first.iter() {
            assert!(!key.is_empty());
            assert!(!values.is_empty());
            for value in values {
                assert!(!value.contains('\n'));
                assert!(!value.contains('\r'));
            }
        }
    }
});
