use super::*;

#[test]
fn display_prefixes_are_stable() {
    assert!(
        BlendError::init("x")
            .to_string()
            .contains("initialization error:")
    );
    assert!(
        BlendError::encoding("x")
            .to_string()
            .contains("encoding error:")
    );
    assert!(
        BlendError::execution("x")
            .to_string()
            .contains("execution error:")
    );
    assert!(BlendError::config("x").to_string().contains("config error:"));
    assert!(
        BlendError::serde("x")
            .to_string()
            .contains("serialization error:")
    );
}

#[test]
fn other_preserves_source() {
    let base = std::io::Error::other("device lost");
    let err = BlendError::Other(anyhow::Error::new(base));
    assert!(err.to_string().contains("device lost"));
}
