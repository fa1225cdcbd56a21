#![allow(dead_code)]

#[derive(calmform::form::FormModel)]
struct Wrapper<T> {
    value: T,
}

fn main() {}
