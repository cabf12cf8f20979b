
#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use crate::error::{translate_status, DrmError, TeeError, DRM_SUCCESS};

    proptest! {
        // Every raw status maps to exactly one DRM code
        #[test]
        fn test_translate_status_is_total(status in any::<u32>()) {
            let code = translate_status(status);
            if status == 0 {
                prop_assert_eq!(code, DRM_SUCCESS);
            } else {
                prop_assert!(DrmError::from_code(code).is_some());
            }
        }

        // Raw codes survive a decode/encode pass
        #[test]
        fn test_tee_code_stable(status in 1u32..) {
            prop_assert_eq!(TeeError::from_code(status).code(), status);
        }

        // Codes outside the agent and TEE client ranges are always generic
        #[test]
        fn test_unknown_status_is_generic(status in 1u32..0xF000_0000) {
            prop_assert_eq!(translate_status(status), DrmError::Generic.code());
        }
    }
}
