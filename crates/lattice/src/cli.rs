use lattice_core::{ServiceListener, Transition};

/// A basic console listener for the command-line demo.
///
/// Prints every committed transition to standard output so the start and
/// stop ordering of the demo graph is visible without enabling debug logs.
#[derive(Debug)]
pub struct ConsoleListener;

#[async_trait::async_trait]
impl ServiceListener for ConsoleListener {
    async fn on_transition(&self, transition: &Transition) {
        println!("  [{}]", transition);
    }
}
