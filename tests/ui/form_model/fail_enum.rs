#![allow(dead_code)]

#[derive(calmform::form::FormModel)]
enum Choice {
    A,
    B,
}

fn main() {}
