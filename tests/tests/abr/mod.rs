mod driver;
mod invariants;
mod scenarios;
mod session;
