//! Fixed key material for unit tests.

use crate::object::RsaKeyComponents;

fn join(parts: &[&str]) -> Vec<u8> {
    hex::decode(parts.concat()).expect("fixture hex")
}

/// A 1024-bit RSA key with public exponent 65537.
pub(crate) fn rsa_1024() -> RsaKeyComponents {
    RsaKeyComponents {
        modulus: join(&[
            "a652ca8923db6536087bab86e9ac04dc4036e3e98bbe58b9658f2e5a815c59e9",
            "e69743cac85071e9d0825224526509a3450baa4b901167e5631ac59a1b23604d",
            "fe99b737d5f00c78d90a817c7797853571008df8c9c598a2f09193e99da4edcc",
            "c7ac793d0eb5941f00fe3a21b74638582f47caa46291bdd91f5867bba9368a1d",
        ]),
        public_exponent: join(&[
            "010001",
        ]),
        private_exponent: join(&[
            "9a0ed5cb718b26948607073a4ff726095cf17aea38a6774842e9fce5982d129b",
            "b51b27900d3b76483cfa795b6b766b16f03d7ddfbff25f69fa0232462c1cf875",
            "c78ade9cf181d1ae747cfb9377bb35b3044da46e6fce21bba3346e61f9c1f274",
            "e588b633cf5c8042a568665157978d7ccb7fec33b43f044b150f5aabce248b81",
        ]),
        prime_1: join(&[
            "d4e4ebe309546bcf799057ec0a6de9d1e86fa49ed3c290dec893db467431ef64",
            "87ca99618f6dc740750a4d0bac553e6172818265ecd8954ff3e1b04a722075d3",
        ]),
        prime_2: join(&[
            "c7ffef77023031aa058d6477c8bb4bd7e2b5b74d30bac21743b917aebbb7e6d4",
            "60d1f7e4a67b6b92f369b01d794af772ebc03e946bcb00d16561768d3f625a4f",
        ]),
        exponent_1: join(&[
            "6fadc2dc2f89bca072c9b8859716ff8060a928373528acac6195c68257f3d5fb",
            "eb8be918179063e4b940f517b9886217e6646fce1e07a393f480a0e4fca77087",
        ]),
        exponent_2: join(&[
            "4b63ae60adf27cc61a51b20d751d24f9bbfbc39cd54190e8341f114e4c74860e",
            "88709d81134072cc71f4e4ee374a8afc46e1b0b541ecc3e22ad5125b2c096701",
        ]),
        coefficient: join(&[
            "557b938c517fce03700127e0910a7b94967df11c3b15cade2915cc04c8880854",
            "06d997b463390a5ee81509375e39c77772ca41ab6f4cd5a5447a7b3f613be7e0",
        ]),
    }
}
