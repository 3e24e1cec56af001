mod acknowledgement;
mod sinks;
