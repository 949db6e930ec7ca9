use std::error::Error;

fn main() -> Result<(), Box<dyn Error>> {
    mcp_relay::cli::main()
}
