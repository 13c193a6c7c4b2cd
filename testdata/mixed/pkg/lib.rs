use std::fmt;

fn helper() -> fmt::Result {
    Ok(())
}
