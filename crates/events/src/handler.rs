//! Deterministic command execution helper.

/// Execute an aggregate command in place (no IO, no async).
///
/// Runs the canonical decide/evolve cycle: `handle` produces events, then
/// each event is `apply`ed to the aggregate. Useful in tests and inline
/// processing; production paths go through the command dispatcher, which
/// adds persistence, publication, and optimistic concurrency.
pub fn execute<A>(aggregate: &mut A, command: &A::Command) -> Result<Vec<A::Event>, A::Error>
where
    A: hemobank_core::Aggregate,
{
    let events = A::handle(aggregate, command)?;
    for ev in &events {
        A::apply(aggregate, ev);
    }
    Ok(events)
}
