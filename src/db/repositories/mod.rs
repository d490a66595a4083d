mod pending;
mod samples;
