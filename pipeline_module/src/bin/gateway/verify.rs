//! Shared-token verification for inbound webhooks. An unset expected token
//! disables the check (local development).

pub(super) fn verify_shared_token(
    expected: Option<&str>,
    provided: Option<&str>,
) -> Result<(), &'static str> {
    let Some(expected) = expected.filter(|value| !value.trim().is_empty()) else {
        return Ok(());
    };
    let provided = provided.ok_or("missing_token")?;
    if provided != expected {
        return Err("invalid_token");
    }
    Ok(())
}
