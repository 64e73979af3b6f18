mod application;
mod presentation;

use partx_core::error::Result;

fn main() -> Result<()> {
    application::run()
}
