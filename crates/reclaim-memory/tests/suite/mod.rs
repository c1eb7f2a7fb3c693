mod fakes;
mod gating;
