mod diagnostics;
mod lifecycle;
mod requests;
mod restart;
mod watching;
