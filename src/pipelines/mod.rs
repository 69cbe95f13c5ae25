pub mod variant_call;
