//! Rebuild when migrations change.
//!
//! `sqlx::migrate!` embeds the migrations at compile time, so cargo has to
//! know to recompile the crate when a migration file is added or edited.

fn main() {
    println!("cargo:rerun-if-changed=migrations/");
}
